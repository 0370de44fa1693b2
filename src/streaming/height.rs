//! Non-blocking height lookups for the render and physics loop

use std::sync::Arc;

use futures::FutureExt;
use glam::Vec2;

use crate::streaming::disk_io::Tile;
use crate::streaming::tile_cache::TileCache;
use crate::terrain::{CoordinateMapper, TileKey};

/// Best-effort terrain height query.
///
/// Never waits: a position whose tile is not resolved yet returns `None`
/// and leaves the resolution running, so a later frame gets the value.
#[derive(Clone)]
pub struct HeightQuery {
    cache: TileCache,
}

impl HeightQuery {
    pub fn new(cache: TileCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Height at a world `(x, z)` position at full detail
    pub fn try_get_height(&self, world: Vec2) -> Option<f32> {
        self.try_get_height_at_lod(world, 0)
    }

    /// Height at a world `(x, z)` position, sampled from the tile at `lod`.
    /// A lod outside `0..=max_lod` has no tiles and yields `None`.
    pub fn try_get_height_at_lod(&self, world: Vec2, lod: i32) -> Option<f32> {
        if !(0..=self.cache.config().max_lod as i32).contains(&lod) {
            return None;
        }
        let mapper = self.cache.mapper();
        let sample = CoordinateMapper::world_to_sample(world);
        let key = mapper.sample_to_tile(sample, lod);

        let tile = self.try_get_tile(key)?;
        tile.heights().get(mapper.sample_index(sample, key)?).copied()
    }

    /// The tile for `key` if it is resolved, otherwise start resolving it
    pub fn try_get_tile(&self, key: TileKey) -> Option<Arc<Tile>> {
        if let Some(tile) = self.cache.resolved(key) {
            return Some(tile);
        }
        match self.cache.get_tile(key).now_or_never()? {
            Ok(tile) => Some(tile),
            Err(e) => {
                log::trace!("Tile {} unavailable: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use crate::core::{Result, TerrainConfig};
    use crate::streaming::survey::{SurveyBuffer, SurveySource};
    use crate::terrain::SurveyTileKey;

    fn config(dir: &std::path::Path) -> TerrainConfig {
        crate::core::logging::init_for_tests();
        TerrainConfig {
            base_tile_size: 4,
            survey_size: 4,
            survey_origin: [0, 4],
            max_lod: 1,
            worker_threads: 2,
            ..TerrainConfig::with_data_dir(dir)
        }
    }

    /// Height = easting + 100 * northing
    struct GridSource;

    impl SurveySource for GridSource {
        fn read(&self, key: SurveyTileKey) -> Result<SurveyBuffer> {
            let heights = (0..16)
                .map(|i| {
                    let (column, row) = (i % 4, i / 4);
                    (key.x * 4 + column) as f32 + 100.0 * (key.y * 4 + row) as f32
                })
                .collect();
            SurveyBuffer::from_heights(key, 4, heights)
        }
    }

    /// Blocks every read until the sender is dropped
    struct GatedSource {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl SurveySource for GatedSource {
        fn read(&self, key: SurveyTileKey) -> Result<SurveyBuffer> {
            let _ = self.gate.lock().recv();
            SurveyBuffer::from_heights(key, 4, vec![7.5; 16])
        }
    }

    #[test]
    fn test_unresolved_tile_returns_none_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = mpsc::channel();
        let source = Arc::new(GatedSource {
            gate: Mutex::new(gate),
        });
        let query = HeightQuery::new(TileCache::with_source(config(dir.path()), source).unwrap());
        let position = Vec2::new(1.5, 2.5);

        let start = Instant::now();
        assert_eq!(query.try_get_height(position), None);
        assert_eq!(query.try_get_height(position), None);
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(query.cache().pending_count(), 1);

        drop(release);
        let key = TileKey::new(0, 0, 0);
        futures::executor::block_on(query.cache().get_tile(key)).unwrap();

        assert_eq!(query.try_get_height(position), Some(7.5));
    }

    #[test]
    fn test_height_follows_survey_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let query = HeightQuery::new(TileCache::with_source(config(dir.path()), Arc::new(GridSource)).unwrap());

        // With origin (0, 4): easting = x, northing = 3 - z
        let positions = [
            Vec2::new(0.0, 0.0),
            Vec2::new(3.9, 3.9),
            Vec2::new(-3.5, -0.2),
            Vec2::new(6.0, 9.0),
        ];
        for position in positions {
            let key = query.cache().mapper().world_to_tile(position, 0);
            futures::executor::block_on(query.cache().get_tile(key)).unwrap();

            let sample = position.floor();
            let expected = sample.x + 100.0 * (3.0 - sample.y);
            assert_eq!(query.try_get_height(position), Some(expected), "at {position}");
        }
    }

    #[test]
    fn test_coarse_lod_query() {
        let dir = tempfile::tempdir().unwrap();
        let query = HeightQuery::new(TileCache::with_source(config(dir.path()), Arc::new(GridSource)).unwrap());
        let key = TileKey::new(0, 0, 1);
        futures::executor::block_on(query.cache().get_tile(key)).unwrap();

        // Sample (2, 2) of lod 1 is local sample (1, 1): lod-0 sample (2, 2)
        assert_eq!(query.try_get_height_at_lod(Vec2::new(2.5, 3.5), 1), Some(2.0 + 100.0));
        assert_eq!(query.try_get_height_at_lod(Vec2::new(2.5, 3.5), 2), None);
    }

    #[test]
    fn test_lod_outside_pyramid_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let query = HeightQuery::new(TileCache::with_source(config(dir.path()), Arc::new(GridSource)).unwrap());

        for lod in [-1, 2, 31, 40, i32::MAX, i32::MIN] {
            assert_eq!(query.try_get_height_at_lod(Vec2::new(1.0, 1.0), lod), None, "lod {lod}");
        }
        assert_eq!(query.cache().pending_count(), 0);
    }
}
