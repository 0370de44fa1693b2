//! Multi-resolution terrain tile cache
//!
//! A tile moves `Unknown -> Resolving -> Resolved` and never back:
//!
//! - `Resolving` is an in-flight future of the tile [`DedupLoader`], so a key
//!   is resolved at most once no matter how many callers ask for it.
//! - `Resolved` is presence in the tile map. Published tiles are immutable
//!   and shared as `Arc<Tile>`.
//!
//! Resolution tries the persisted tile first, then synthesizes: lod 0 from
//! the raw surveys overlapping the tile, lod > 0 by downsampling the four
//! children. Only complete tiles are persisted, since a tile with missing
//! survey data may get that data later.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{self, FutureExt, join_all};
use glam::IVec2;
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;

use crate::core::{LoadError, Result, TerrainConfig};
use crate::streaming::cache::SurveyCache;
use crate::streaming::disk_io::{Tile, TileStore};
use crate::streaming::loader::{DedupLoader, LoadFuture};
use crate::streaming::priority::TilePriorityQueue;
use crate::streaming::survey::{RawSurveyReader, SurveyBuffer, SurveySource};
use crate::terrain::{CoordinateMapper, SurveyFootprint, SurveyTileKey, TileKey};

/// Running counters of the cache's work
#[derive(Debug, Default)]
struct TileCacheStats {
    loaded_from_disk: AtomicU64,
    synthesized: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    surveys_read: AtomicU64,
    duplicate_publishes: AtomicU64,
}

/// Point-in-time copy of the cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileCacheStatsSnapshot {
    pub loaded_from_disk: u64,
    pub synthesized: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub surveys_read: u64,
    pub duplicate_publishes: u64,
}

impl TileCacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TileCacheStatsSnapshot {
        TileCacheStatsSnapshot {
            loaded_from_disk: self.loaded_from_disk.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            surveys_read: self.surveys_read.load(Ordering::Relaxed),
            duplicate_publishes: self.duplicate_publishes.load(Ordering::Relaxed),
        }
    }
}

type SurveyFuture = LoadFuture<Option<Arc<SurveyBuffer>>>;

/// State shared between the cache handle and its background tasks
struct Inner {
    config: TerrainConfig,
    mapper: CoordinateMapper,
    /// Resolved tiles
    tiles: DashMap<TileKey, Arc<Tile>>,
    tile_loader: DedupLoader<TileKey, Arc<Tile>>,
    store: TileStore,
    source: Arc<dyn SurveySource>,
    surveys: Mutex<SurveyCache>,
    survey_loader: DedupLoader<SurveyTileKey, Option<Arc<SurveyBuffer>>>,
    /// Surveys found missing or malformed, not retried
    missing_surveys: DashSet<SurveyTileKey>,
    ready_tx: mpsc::UnboundedSender<TileKey>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<TileKey>>,
    stats: TileCacheStats,
}

/// Async tile cache with deduplicated resolution
///
/// Cloning is cheap; clones share the same tiles and background work.
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<Inner>,
    /// Owned runtime, if the cache was not given a handle
    #[allow(dead_code)]
    runtime: Option<Arc<Runtime>>,
}

impl TileCache {
    /// Create a cache reading raw surveys from `config.survey_dir`, with its
    /// own worker runtime
    pub fn new(config: TerrainConfig) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(RawSurveyReader::from_config(&config)?);
        Self::with_source(config, source)
    }

    /// Create a cache with its own worker runtime and a custom survey source
    pub fn with_source(config: TerrainConfig, source: Arc<dyn SurveySource>) -> Result<Self> {
        let runtime = Arc::new(build_runtime(&config)?);
        let mut cache = Self::with_handle(config, runtime.handle().clone(), source)?;
        cache.runtime = Some(runtime);
        Ok(cache)
    }

    /// Create a cache that spawns its work on an existing runtime
    pub fn with_handle(
        config: TerrainConfig,
        handle: Handle,
        source: Arc<dyn SurveySource>,
    ) -> Result<Self> {
        config.validate()?;
        let store = TileStore::from_config(&config)?;
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            mapper: CoordinateMapper::from_config(&config),
            tiles: DashMap::new(),
            tile_loader: DedupLoader::new(handle.clone()),
            store,
            source,
            surveys: Mutex::new(SurveyCache::new(config.survey_cache_capacity)),
            survey_loader: DedupLoader::new(handle),
            missing_surveys: DashSet::new(),
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            stats: TileCacheStats::default(),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
            runtime: None,
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.inner.config
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.inner.mapper
    }

    pub fn store(&self) -> &TileStore {
        &self.inner.store
    }

    /// Runtime the background work is spawned on
    pub fn handle(&self) -> &Handle {
        self.inner.tile_loader.runtime()
    }

    /// Get a tile, resolving it in the background if needed.
    ///
    /// Never blocks. Resolved tiles come back as an already completed future;
    /// concurrent calls for an unresolved key share one resolution.
    pub fn get_tile(&self, key: TileKey) -> LoadFuture<Arc<Tile>> {
        self.inner.get_tile(key)
    }

    /// Start resolving a tile without keeping its future
    pub fn request(&self, key: TileKey) {
        let _ = self.get_tile(key);
    }

    /// Get a tile only if it is already resolved
    pub fn resolved(&self, key: TileKey) -> Option<Arc<Tile>> {
        self.inner.resolved(key)
    }

    pub fn is_resolved(&self, key: TileKey) -> bool {
        self.inner.tiles.contains_key(&key)
    }

    pub fn is_pending(&self, key: TileKey) -> bool {
        self.inner.tile_loader.is_pending(&key)
    }

    pub fn is_persisted(&self, key: TileKey) -> bool {
        self.inner.store.exists(key)
    }

    /// Number of tiles currently resolving
    pub fn pending_count(&self) -> usize {
        self.inner.tile_loader.pending_count()
    }

    /// Number of resolved tiles
    pub fn len(&self) -> usize {
        self.inner.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tiles.is_empty()
    }

    /// Drain the keys of tiles resolved since the last call (non-blocking)
    pub fn poll_ready(&self) -> Vec<TileKey> {
        let mut ready_rx = self.inner.ready_rx.lock();
        let mut ready = Vec::new();
        while let Ok(key) = ready_rx.try_recv() {
            ready.push(key);
        }
        ready
    }

    pub fn stats(&self) -> TileCacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Request up to `budget` of the highest priority tiles that are neither
    /// resolved nor resolving. Returns the number of requests issued.
    pub fn prefetch(&self, queue: &mut TilePriorityQueue, budget: usize) -> usize {
        let mut issued = 0;
        while issued < budget {
            let Some(next) = queue.pop() else {
                break;
            };
            if self.is_resolved(next.key) || self.is_pending(next.key) {
                continue;
            }
            self.request(next.key);
            issued += 1;
        }
        issued
    }
}

fn build_runtime(config: &TerrainConfig) -> Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.thread_name("terrain-worker").enable_all();
    if config.worker_threads > 0 {
        builder.worker_threads(config.worker_threads);
    }
    Ok(builder.build()?)
}

/// Run CPU or disk bound work off the async workers
async fn run_blocking<T, F>(work: F) -> std::result::Result<T, LoadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(LoadError::from)
}

fn ready<V: Clone + Send + Sync + 'static>(value: std::result::Result<V, LoadError>) -> LoadFuture<V> {
    future::ready(value).boxed().shared()
}

impl Inner {
    fn resolved(&self, key: TileKey) -> Option<Arc<Tile>> {
        self.tiles.get(&key).map(|tile| Arc::clone(tile.value()))
    }

    fn get_tile(self: &Arc<Self>, key: TileKey) -> LoadFuture<Arc<Tile>> {
        let max = self.config.max_lod;
        if key.lod < 0 || key.lod > max as i32 {
            return ready(Err(LoadError::LodOutOfRange { lod: key.lod, max }));
        }
        if let Some(tile) = self.resolved(key) {
            log::trace!("Tile {} cache hit", key);
            return ready(Ok(tile));
        }

        let inner = Arc::clone(self);
        self.tile_loader.load(key, move || inner.resolve(key))
    }

    async fn resolve(self: Arc<Self>, key: TileKey) -> std::result::Result<Arc<Tile>, LoadError> {
        // A previous episode may have published between the map check and the load
        if let Some(tile) = self.resolved(key) {
            return Ok(tile);
        }
        let start = Instant::now();

        if self.store.exists(key) {
            let inner = Arc::clone(&self);
            let loaded = run_blocking(move || {
                inner.store.load(key).inspect_err(|_| {
                    // Regenerated below; a complete result replaces the file
                    let _ = inner.store.remove(key);
                })
            })
            .await?;

            match loaded {
                Ok(tile) => {
                    TileCacheStats::bump(&self.stats.loaded_from_disk);
                    log::debug!("Loaded tile {} from disk in {:.1?}", key, start.elapsed());
                    return Ok(self.publish(Arc::new(tile)));
                }
                Err(e) => log::warn!("{}, regenerating", e),
            }
        }

        let tile = if key.lod == 0 {
            self.synthesize_base(key).await?
        } else {
            self.synthesize_downsampled(key).await?
        };
        TileCacheStats::bump(&self.stats.synthesized);
        log::debug!(
            "Synthesized tile {} ({}) in {:.1?}",
            key,
            if tile.is_complete() { "complete" } else { "incomplete" },
            start.elapsed()
        );

        let tile = Arc::new(tile);
        if tile.is_complete() {
            let inner = Arc::clone(&self);
            let to_save = Arc::clone(&tile);
            match run_blocking(move || inner.store.save(&to_save)).await? {
                Ok(()) => TileCacheStats::bump(&self.stats.persisted),
                Err(e) => {
                    TileCacheStats::bump(&self.stats.persist_failures);
                    log::warn!("{}", e);
                }
            }
        }

        Ok(self.publish(tile))
    }

    /// Build a lod-0 tile from every survey overlapping it
    async fn synthesize_base(self: &Arc<Self>, key: TileKey) -> std::result::Result<Tile, LoadError> {
        let footprint = self.mapper.survey_footprint(key);
        let fetches = footprint.iter().map(|survey| self.survey(survey));
        let surveys: Vec<Option<Arc<SurveyBuffer>>> = join_all(fetches)
            .await
            .into_iter()
            .zip(footprint.iter())
            .map(|(result, survey)| {
                result.unwrap_or_else(|e| {
                    log::warn!("Reading survey {} failed: {}", survey, e);
                    None
                })
            })
            .collect();

        let complete = surveys.iter().all(Option::is_some);
        let mapper = self.mapper;
        run_blocking(move || {
            let heights = assemble_from_surveys(&mapper, key, &footprint, &surveys);
            Tile::new(key, mapper.base_tile_size() as usize, heights, complete)
        })
        .await
    }

    /// Build a lod > 0 tile from its four children
    async fn synthesize_downsampled(self: &Arc<Self>, key: TileKey) -> std::result::Result<Tile, LoadError> {
        let children = key.children();
        let results = join_all(children.iter().map(|&child| self.get_tile(child))).await;

        let tiles: Vec<Option<Arc<Tile>>> = results
            .into_iter()
            .zip(children)
            .map(|(result, child)| match result {
                Ok(tile) => Some(tile),
                Err(e) => {
                    log::warn!("Child tile {} of {} failed: {}", child, key, e);
                    None
                }
            })
            .collect();

        let complete = tiles.iter().all(|t| t.as_ref().is_some_and(|t| t.is_complete()));
        let size = self.mapper.base_tile_size() as usize;
        run_blocking(move || {
            let quadrants = std::array::from_fn(|i| tiles[i].as_deref().map(Tile::heights));
            Tile::new(key, size, downsample_children(size, quadrants), complete)
        })
        .await
    }

    /// Get a decoded survey, sharing reads between concurrent tiles
    fn survey(self: &Arc<Self>, key: SurveyTileKey) -> SurveyFuture {
        if self.missing_surveys.contains(&key) {
            return ready(Ok(None));
        }
        if let Some(buffer) = self.surveys.lock().get(key) {
            return ready(Ok(Some(buffer)));
        }

        let inner = Arc::clone(self);
        self.survey_loader
            .load(key, move || run_blocking(move || inner.read_survey(key)))
    }

    fn read_survey(&self, key: SurveyTileKey) -> Option<Arc<SurveyBuffer>> {
        if let Some(buffer) = self.surveys.lock().get(key) {
            return Some(buffer);
        }
        if self.missing_surveys.contains(&key) {
            return None;
        }

        let expected = self.config.survey_size as usize;
        let reason = match self.source.read(key) {
            Ok(buffer) if buffer.size() == expected => {
                TileCacheStats::bump(&self.stats.surveys_read);
                let buffer = Arc::new(buffer);
                self.surveys.lock().insert(Arc::clone(&buffer));
                return Some(buffer);
            }
            Ok(buffer) => format!(
                "Survey tile {} has {} samples per row, expected {}",
                key,
                buffer.size(),
                expected
            ),
            Err(e) => e.to_string(),
        };

        if self.missing_surveys.insert(key) {
            log::warn!("{}, leaving its area empty", reason);
        }
        None
    }

    /// Insert into the tile map unless another result got there first
    fn publish(&self, tile: Arc<Tile>) -> Arc<Tile> {
        let key = tile.key();
        match self.tiles.entry(key) {
            Entry::Occupied(existing) => {
                TileCacheStats::bump(&self.stats.duplicate_publishes);
                log::warn!("Tile {} was resolved twice, keeping the first result", key);
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&tile));
                let _ = self.ready_tx.send(key);
                tile
            }
        }
    }
}

/// Copy the samples of a lod-0 tile out of the surveys covering it.
///
/// `surveys` holds one entry per footprint tile in row-major order; `None`
/// leaves that area at zero. Each destination row is copied as contiguous
/// strips, switching surveys at survey boundaries.
pub fn assemble_from_surveys(
    mapper: &CoordinateMapper,
    key: TileKey,
    footprint: &SurveyFootprint,
    surveys: &[Option<Arc<SurveyBuffer>>],
) -> Vec<f32> {
    debug_assert_eq!(key.lod, 0);
    let size = mapper.base_tile_size() as usize;
    let survey_size = mapper.survey_size();
    let origin = mapper.tile_origin(key);
    let columns = footprint.columns();

    let mut heights = vec![0.0f32; size * size];
    heights.par_chunks_mut(size).enumerate().for_each(|(row, dest)| {
        let start = mapper.sample_to_survey(IVec2::new(origin.x, origin.y + row as i32));
        let survey_y = start.y.div_euclid(survey_size);
        let source_row = start.y.rem_euclid(survey_size) as usize;
        let end = start.x + size as i32;

        let mut e = start.x;
        while e < end {
            let survey_x = e.div_euclid(survey_size);
            let strip_end = ((survey_x + 1) * survey_size).min(end);
            let len = (strip_end - e) as usize;

            let index = (survey_y - footprint.min.y) as usize * columns + (survey_x - footprint.min.x) as usize;
            if let Some(Some(buffer)) = surveys.get(index) {
                let column = e.rem_euclid(survey_size) as usize;
                let offset = (e - start.x) as usize;
                dest[offset..offset + len].copy_from_slice(&buffer.row(source_row)[column..column + len]);
            }
            e = strip_end;
        }
    });
    heights
}

/// Nearest-sample downsample of four children into one tile of `size²`.
///
/// Quadrant `i` is child `(i % 2, i / 2)` of [`TileKey::children`]; a
/// missing child leaves its quadrant at zero.
pub fn downsample_children(size: usize, children: [Option<&[f32]>; 4]) -> Vec<f32> {
    let half = size / 2;
    let mut heights = vec![0.0f32; size * size];
    heights.par_chunks_mut(size).enumerate().for_each(|(row, dest)| {
        let dy = row / half;
        let source_row = (row % half) * 2;
        for dx in 0..2 {
            let Some(child) = children[dy * 2 + dx] else {
                continue;
            };
            let source = &child[source_row * size..(source_row + 1) * size];
            for (column, out) in dest[dx * half..(dx + 1) * half].iter_mut().enumerate() {
                *out = source[column * 2];
            }
        }
    });
    heights
}
