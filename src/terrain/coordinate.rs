//! Tile grid and survey grid coordinates
//!
//! World space is `x` east, `z` south (a z-forward world). Samples sit on
//! integer world positions. The survey grid is projected easting/northing,
//! so its second axis runs the other way:
//!
//! ```text
//!        Survey                 |         Tiles
//!  0,1       1,1                |          0,-1
//!   +---------+                 |           |
//!   |         |                 |   -1,0 ---+--- 1,0
//!   |  (e,n)  |                 |           |
//!   +---------+                 |    (x,z)  |
//!  0,0       1,0                |          0,1
//!
//! e = x - origin.x              |  x = e + origin.x
//! n = origin.y - 1 - z          |  z = origin.y - 1 - n
//! ```
//!
//! The flip lives only in `sample_to_survey` / `survey_to_sample`.

use std::fmt;

use glam::{DVec2, IVec2, Vec2};

use crate::core::TerrainConfig;
use crate::streaming::lod::sample_spacing;

/// One square tile of `base_tile_size << lod` world units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: i32,
    pub y: i32,
    pub lod: i32,
}

impl TileKey {
    pub const fn new(x: i32, y: i32, lod: i32) -> Self {
        Self { x, y, lod }
    }

    /// The four lod-1 tiles covering this tile, in quadrant order
    /// `(0,0), (1,0), (0,1), (1,1)`
    pub fn children(&self) -> [TileKey; 4] {
        let (x, y, lod) = (self.x * 2, self.y * 2, self.lod - 1);
        [
            TileKey::new(x, y, lod),
            TileKey::new(x + 1, y, lod),
            TileKey::new(x, y + 1, lod),
            TileKey::new(x + 1, y + 1, lod),
        ]
    }

    /// The lod+1 tile containing this tile
    pub fn parent(&self) -> TileKey {
        TileKey::new(self.x.div_euclid(2), self.y.div_euclid(2), self.lod + 1)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) lod {}", self.x, self.y, self.lod)
    }
}

/// One raw survey file, indexed in survey-size units of easting/northing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurveyTileKey {
    pub x: i32,
    pub y: i32,
}

impl SurveyTileKey {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for SurveyTileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Inclusive rectangle of survey tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurveyFootprint {
    pub min: SurveyTileKey,
    pub max: SurveyTileKey,
}

impl SurveyFootprint {
    pub fn columns(&self) -> usize {
        (self.max.x - self.min.x + 1) as usize
    }

    pub fn rows(&self) -> usize {
        (self.max.y - self.min.y + 1) as usize
    }

    pub fn len(&self) -> usize {
        self.columns() * self.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: SurveyTileKey) -> bool {
        (self.min.x..=self.max.x).contains(&key.x) && (self.min.y..=self.max.y).contains(&key.y)
    }

    /// Row-major iteration over every survey tile in the rectangle
    pub fn iter(&self) -> impl Iterator<Item = SurveyTileKey> + use<> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| SurveyTileKey::new(x, y)))
    }
}

/// Pure transforms between world, tile and survey space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateMapper {
    base_tile_size: i32,
    survey_size: i32,
    origin: IVec2,
}

impl CoordinateMapper {
    pub fn new(base_tile_size: u32, survey_size: u32, origin: IVec2) -> Self {
        Self {
            base_tile_size: base_tile_size as i32,
            survey_size: survey_size as i32,
            origin,
        }
    }

    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(config.base_tile_size, config.survey_size, config.survey_origin())
    }

    pub fn base_tile_size(&self) -> i32 {
        self.base_tile_size
    }

    pub fn survey_size(&self) -> i32 {
        self.survey_size
    }

    /// Edge length of a tile at `lod` in world units, `None` for a negative
    /// lod or an edge past `i32::MAX`
    pub fn checked_tile_edge(&self, lod: i32) -> Option<i32> {
        let spacing = sample_spacing(u32::try_from(lod).ok()?)?;
        self.base_tile_size.checked_mul(i32::try_from(spacing).ok()?)
    }

    /// Edge length of a tile at `lod` in world units. Saturates at
    /// `i32::MAX` where [`Self::checked_tile_edge`] fails.
    #[inline]
    pub fn tile_edge(&self, lod: i32) -> i32 {
        self.checked_tile_edge(lod).unwrap_or(i32::MAX)
    }

    /// Integer sample position containing a world position
    #[inline]
    pub fn world_to_sample(world: Vec2) -> IVec2 {
        world.floor().as_ivec2()
    }

    pub fn sample_to_tile(&self, sample: IVec2, lod: i32) -> TileKey {
        let edge = self.tile_edge(lod);
        TileKey::new(sample.x.div_euclid(edge), sample.y.div_euclid(edge), lod)
    }

    pub fn world_to_tile(&self, world: Vec2, lod: i32) -> TileKey {
        self.sample_to_tile(Self::world_to_sample(world), lod)
    }

    /// First sample (north-west corner) of a tile
    pub fn tile_origin(&self, key: TileKey) -> IVec2 {
        let edge = self.tile_edge(key.lod);
        IVec2::new(key.x.saturating_mul(edge), key.y.saturating_mul(edge))
    }

    pub fn tile_world_origin(&self, key: TileKey) -> Vec2 {
        self.tile_origin(key).as_vec2()
    }

    /// Buffer index of `sample` inside tile `key`, `None` if the tile does
    /// not cover it
    pub fn sample_index(&self, sample: IVec2, key: TileKey) -> Option<usize> {
        let spacing = self.checked_tile_edge(key.lod)? / self.base_tile_size;
        let origin = self.tile_origin(key);
        let local = |s: i32, o: i32| -> Option<usize> {
            let column = s.checked_sub(o)?.div_euclid(spacing);
            (0..self.base_tile_size).contains(&column).then_some(column as usize)
        };
        let (x, y) = (local(sample.x, origin.x)?, local(sample.y, origin.y)?);
        Some(y * self.base_tile_size as usize + x)
    }

    /// World sample to survey easting/northing sample
    #[inline]
    pub fn sample_to_survey(&self, sample: IVec2) -> IVec2 {
        IVec2::new(
            sample.x.saturating_sub(self.origin.x),
            (self.origin.y - 1).saturating_sub(sample.y),
        )
    }

    #[inline]
    pub fn survey_to_sample(&self, survey: IVec2) -> IVec2 {
        IVec2::new(survey.x + self.origin.x, self.origin.y - 1 - survey.y)
    }

    pub fn survey_tile_of(&self, survey: IVec2) -> SurveyTileKey {
        SurveyTileKey::new(
            survey.x.div_euclid(self.survey_size),
            survey.y.div_euclid(self.survey_size),
        )
    }

    pub fn world_to_survey_tile(&self, world: Vec2) -> SurveyTileKey {
        self.survey_tile_of(self.sample_to_survey(Self::world_to_sample(world)))
    }

    /// North-west world sample of a survey tile
    pub fn survey_tile_origin(&self, key: SurveyTileKey) -> IVec2 {
        IVec2::new(
            self.origin.x + key.x * self.survey_size,
            self.origin.y - (key.y + 1) * self.survey_size,
        )
    }

    /// Survey tiles overlapping a tile's samples
    pub fn survey_footprint(&self, key: TileKey) -> SurveyFootprint {
        let first = self.tile_origin(key);
        let span = self.tile_edge(key.lod) - 1;
        let last = IVec2::new(first.x.saturating_add(span), first.y.saturating_add(span));

        // The flip swaps which corner has the smaller northing
        let a = self.survey_tile_of(self.sample_to_survey(IVec2::new(first.x, last.y)));
        let b = self.survey_tile_of(self.sample_to_survey(IVec2::new(last.x, first.y)));
        SurveyFootprint { min: a, max: b }
    }

    /// World position to projected easting/northing in meters
    pub fn world_to_projected(&self, world: Vec2) -> DVec2 {
        DVec2::new(
            world.x as f64 - self.origin.x as f64,
            self.origin.y as f64 - world.y as f64,
        )
    }

    pub fn projected_to_world(&self, projected: DVec2) -> Vec2 {
        Vec2::new(
            (projected.x + self.origin.x as f64) as f32,
            (self.origin.y as f64 - projected.y) as f32,
        )
    }
}
