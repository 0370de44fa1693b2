//! Tile grid and survey grid coordinates

pub mod coordinate;
pub use coordinate::{CoordinateMapper, SurveyFootprint, SurveyTileKey, TileKey};
