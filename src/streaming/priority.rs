//! Priority queue for tile prefetching based on camera distance
//!
//! Every LOD owns a distance ring around the camera (see [`lod_band`]); the
//! queue holds the tiles of each ring that are not resolved yet, nearest
//! first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::{IVec2, Vec2};

use crate::streaming::lod::{lod_band, lod_from_distance};
use crate::terrain::{CoordinateMapper, TileKey};

/// Priority information for a tile
#[derive(Clone, Copy, Debug)]
pub struct TilePriority {
    pub key: TileKey,
    pub priority: f32, // Higher = more important
    pub distance: f32, // Distance from camera to tile center
}

impl TilePriority {
    pub fn calculate(key: TileKey, camera: Vec2, mapper: &CoordinateMapper) -> Self {
        let half_edge = mapper.tile_edge(key.lod) as f32 * 0.5;
        let center = mapper.tile_world_origin(key) + Vec2::splat(half_edge);
        let distance = camera.distance(center);

        Self {
            key,
            priority: 1.0 / (distance + 1.0),
            distance,
        }
    }
}

// Ord/PartialOrd for BinaryHeap (max-heap)
impl Eq for TilePriority {}

impl PartialEq for TilePriority {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Ord for TilePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

impl PartialOrd for TilePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue for tile prefetching
pub struct TilePriorityQueue {
    heap: BinaryHeap<TilePriority>,
    max_distance: f32, // Don't queue tiles beyond this
}

impl TilePriorityQueue {
    pub fn new(max_distance: f32) -> Self {
        Self {
            heap: BinaryHeap::new(),
            max_distance,
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Add a tile to the queue if it is within the max distance
    pub fn push(&mut self, priority: TilePriority) {
        if priority.distance <= self.max_distance {
            self.heap.push(priority);
        }
    }

    /// Get the highest priority (nearest) tile
    pub fn pop(&mut self) -> Option<TilePriority> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Refill the queue with the tiles around `camera`.
    ///
    /// A tile is queued at the LOD its center distance selects, so each ring
    /// contributes only tiles of its own LOD. Tiles for which `resolved`
    /// returns true are skipped.
    pub fn update(
        &mut self,
        camera: Vec2,
        mapper: &CoordinateMapper,
        lod0_distance: f32,
        max_lod: u32,
        resolved: impl Fn(TileKey) -> bool,
    ) {
        self.clear();

        for lod in 0..=max_lod {
            let (near, far) = lod_band(lod, lod0_distance, max_lod);
            if near > self.max_distance {
                break;
            }
            let far = far.min(self.max_distance);

            let lod = lod as i32;
            // Tiles past this lod are wider than the coordinate range
            let Some(edge) = mapper.checked_tile_edge(lod) else {
                break;
            };
            let edge = edge as f32;
            let radius = (far / edge).ceil() as i32 + 1;
            let center = mapper.world_to_tile(camera, lod);

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let tile = IVec2::new(center.x + dx, center.y + dy);
                    let key = TileKey::new(tile.x, tile.y, lod);
                    let priority = TilePriority::calculate(key, camera, mapper);

                    if lod_from_distance(priority.distance, lod0_distance, max_lod) != lod as u32 {
                        continue;
                    }
                    if resolved(key) {
                        continue;
                    }
                    self.push(priority);
                }
            }
        }
    }
}
