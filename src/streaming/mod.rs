//! Tile resolution, persistence and non-blocking queries

pub mod cache;
pub mod disk_io;
pub mod height;
pub mod loader;
pub mod lod;
pub mod priority;
pub mod survey;
pub mod tile_cache;
pub mod window;

pub use cache::SurveyCache;
pub use disk_io::{Tile, TileStore, tile_file_name, parse_tile_file_name};
pub use height::HeightQuery;
pub use loader::{DedupLoader, LoadFuture};
pub use lod::{lod_from_distance, lod_band, sample_spacing, DEFAULT_MAX_LOD};
pub use priority::{TilePriority, TilePriorityQueue};
pub use survey::{RawSurveyReader, SurveyBuffer, SurveyCatalog, SurveySource, parse_survey};
pub use tile_cache::{TileCache, TileCacheStatsSnapshot, assemble_from_surveys, downsample_children};
pub use window::{SlotChange, TileWindow};
