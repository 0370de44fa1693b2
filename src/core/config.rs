//! Terrain pipeline configuration

use std::io;
use std::path::{Path, PathBuf};

use glam::IVec2;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use crate::streaming::lod::DEFAULT_MAX_LOD;

/// Fixed-width layout of one raw survey record.
///
/// A record looks like `280000.00 5660999.00 74.52 \r\n`; only the height
/// field is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyFormat {
    /// Bytes per record including the line terminator
    pub line_length: usize,
    /// Byte offset of the height field within a record
    pub height_offset: usize,
    /// Width of the height field, at most 9 digits; a space ends the field early
    pub height_width: usize,
    /// Divisor turning the accumulated digits into meters
    pub height_divisor: f32,
}

impl Default for SurveyFormat {
    fn default() -> Self {
        Self {
            line_length: 27 + 2, // \r\n
            height_offset: 21,
            height_width: 6,
            height_divisor: 100.0,
        }
    }
}

/// Widest height field whose digits always fit the `i32` accumulator
pub const MAX_HEIGHT_WIDTH: usize = 9;

/// Configuration for the terrain tile pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Directory holding the raw `*.xyz.gz` survey files
    pub survey_dir: PathBuf,
    /// Directory holding persisted tiles
    pub tile_dir: PathBuf,
    /// Edge length of a lod-0 tile in samples (power of two)
    pub base_tile_size: u32,
    /// Edge length of a survey file in samples
    pub survey_size: u32,
    /// World position of the projected (EPSG:25832) origin
    pub survey_origin: [i32; 2],
    pub survey_prefix: String,
    pub survey_suffix: String,
    pub survey_format: SurveyFormat,
    /// Coarsest LOD that may be requested
    pub max_lod: u32,
    /// Decoded survey buffers kept in memory (~4MB each at 1000x1000)
    pub survey_cache_capacity: usize,
    /// Worker threads of an owned runtime, 0 = tokio default
    pub worker_threads: usize,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            survey_dir: PathBuf::from("Data/Raw"),
            tile_dir: PathBuf::from("Data/Tile"),
            base_tile_size: 1024,
            survey_size: 1000,
            survey_origin: [-346_000, 5_675_000],
            survey_prefix: "dgm1_32".to_string(),
            survey_suffix: "1_nw".to_string(),
            survey_format: SurveyFormat::default(),
            max_lod: DEFAULT_MAX_LOD,
            survey_cache_capacity: 64,
            worker_threads: 0,
        }
    }
}

impl TerrainConfig {
    /// Config rooted at `data_dir`, using `Raw/` and `Tile/` below it
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            survey_dir: data_dir.join("Raw"),
            tile_dir: data_dir.join("Tile"),
            ..Default::default()
        }
    }

    pub fn survey_origin(&self) -> IVec2 {
        IVec2::from(self.survey_origin)
    }

    /// log2 of the base tile size, part of every persisted tile name
    pub fn base_tile_log2(&self) -> u32 {
        self.base_tile_size.trailing_zeros()
    }

    /// Samples in one tile
    pub fn tile_area(&self) -> usize {
        (self.base_tile_size as usize) * (self.base_tile_size as usize)
    }

    /// Samples in one survey file
    pub fn survey_area(&self) -> usize {
        (self.survey_size as usize) * (self.survey_size as usize)
    }

    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.base_tile_size < 2 || !self.base_tile_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "base_tile_size must be a power of two >= 2, got {}",
                self.base_tile_size
            )));
        }
        if self.survey_size == 0 {
            return Err(Error::Config("survey_size must be positive".to_string()));
        }
        let format = &self.survey_format;
        if format.height_width == 0
            || format.height_offset + format.height_width > format.line_length
            || format.height_divisor <= 0.0
        {
            return Err(Error::Config(format!(
                "height field {}..{} does not fit in a {} byte record",
                format.height_offset,
                format.height_offset + format.height_width,
                format.line_length
            )));
        }
        if format.height_width > MAX_HEIGHT_WIDTH {
            return Err(Error::Config(format!(
                "height_width {} exceeds {} digits",
                format.height_width, MAX_HEIGHT_WIDTH
            )));
        }
        let coarsest_edge = (self.base_tile_size as u64).checked_shl(self.max_lod);
        if self.max_lod > 16 || coarsest_edge.is_none_or(|edge| edge > i32::MAX as u64) {
            return Err(Error::Config(format!(
                "max_lod {} is too large for {} sample tiles",
                self.max_lod, self.base_tile_size
            )));
        }
        Ok(())
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from file (sync) and validate
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}
