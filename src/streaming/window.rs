//! 2x2 window of full-detail tiles around the camera
//!
//! The window only moves once the camera comes within [`HYSTERESIS`] of a
//! tile edge of its border, so walking back and forth across a tile boundary
//! does not thrash. Each tile has a fixed slot, `(y mod 2) * 2 + (x mod 2)`,
//! so a move replaces at most the tiles that actually left the window.

use glam::{IVec2, Vec2};

use crate::terrain::{CoordinateMapper, TileKey};

/// Distance to the window border, in tiles, that triggers a move
pub const HYSTERESIS: f32 = 0.375;

/// A slot whose tile changed during [`TileWindow::update`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotChange {
    pub slot: usize,
    pub key: TileKey,
    pub previous: Option<TileKey>,
}

#[derive(Clone, Debug)]
pub struct TileWindow {
    tile_edge: f32,
    /// Lower corner tile of the window
    lower: IVec2,
    slots: [Option<TileKey>; 4],
}

impl TileWindow {
    pub fn new(mapper: &CoordinateMapper) -> Self {
        Self {
            tile_edge: mapper.tile_edge(0) as f32,
            lower: IVec2::ZERO,
            slots: [None; 4],
        }
    }

    /// Fixed slot of a tile
    pub fn slot_of(key: TileKey) -> usize {
        (key.y.rem_euclid(2) * 2 + key.x.rem_euclid(2)) as usize
    }

    /// Tiles currently in the window, by slot
    pub fn tiles(&self) -> [Option<TileKey>; 4] {
        self.slots
    }

    /// Lower corner tile of the window; the window spans `lower..lower + 2`
    pub fn lower(&self) -> IVec2 {
        self.lower
    }

    /// Follow the camera, returning the slots whose tile changed
    pub fn update(&mut self, camera: Vec2) -> Vec<SlotChange> {
        let t = camera / self.tile_edge;
        let min = self.lower.as_vec2();
        let max = min + Vec2::splat(2.0);

        let initialized = self.slots.iter().all(Option::is_some);
        let near_border = t.x < min.x + HYSTERESIS
            || t.x > max.x - HYSTERESIS
            || t.y < min.y + HYSTERESIS
            || t.y > max.y - HYSTERESIS;

        if initialized && !near_border {
            return Vec::new();
        }
        self.switch(t)
    }

    fn switch(&mut self, t: Vec2) -> Vec<SlotChange> {
        self.lower = (t - Vec2::splat(0.5)).floor().as_ivec2();

        let mut changes = Vec::new();
        for (dx, dy) in [(0, 0), (1, 0), (1, 1), (0, 1)] {
            let key = TileKey::new(self.lower.x + dx, self.lower.y + dy, 0);
            let slot = Self::slot_of(key);
            let previous = self.slots[slot];
            if previous == Some(key) {
                continue;
            }
            self.slots[slot] = Some(key);
            changes.push(SlotChange { slot, key, previous });
        }
        changes
    }
}
