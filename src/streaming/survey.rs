//! Raw elevation survey files
//!
//! A survey file is a gzip-compressed ASCII grid of `survey_size²`
//! fixed-width records, northernmost row first. Decoded buffers are stored
//! southernmost row first so that buffer row `r` is northing `key.y * size + r`.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::read::GzDecoder;

use crate::core::{Error, Result, SurveyFormat, TerrainConfig};
use crate::terrain::SurveyTileKey;

/// Decoded heights of one survey file, in meters
#[derive(Clone, PartialEq)]
pub struct SurveyBuffer {
    key: SurveyTileKey,
    size: usize,
    heights: Vec<f32>,
}

impl std::fmt::Debug for SurveyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurveyBuffer")
            .field("key", &self.key)
            .field("size", &self.size)
            .finish()
    }
}

impl SurveyBuffer {
    /// Wrap already decoded heights, row 0 = southernmost
    pub fn from_heights(key: SurveyTileKey, size: usize, heights: Vec<f32>) -> Result<Self> {
        if heights.len() != size * size {
            return Err(Error::MalformedSurvey {
                key,
                reason: format!("{} heights for a {}x{} grid", heights.len(), size, size),
            });
        }
        Ok(Self { key, size, heights })
    }

    pub fn key(&self) -> SurveyTileKey {
        self.key
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// One row of samples, west to east
    pub fn row(&self, row: usize) -> &[f32] {
        &self.heights[row * self.size..(row + 1) * self.size]
    }

    pub fn height(&self, column: usize, row: usize) -> f32 {
        self.heights[row * self.size + column]
    }
}

/// Anything that can produce survey buffers
pub trait SurveySource: Send + Sync + 'static {
    /// Read one survey tile. `Error::SurveyNotFound` means the area has no data.
    fn read(&self, key: SurveyTileKey) -> Result<SurveyBuffer>;
}

/// File name of a survey tile: `{prefix}_{x}_{y}_{suffix}.xyz.gz`
pub fn survey_file_name(prefix: &str, suffix: &str, key: SurveyTileKey) -> String {
    format!("{}_{}_{}_{}.xyz.gz", prefix, key.x, key.y, suffix)
}

/// Inverse of [`survey_file_name`]
pub fn parse_survey_file_name(name: &str, prefix: &str, suffix: &str) -> Option<SurveyTileKey> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    let rest = rest.strip_suffix(".xyz.gz")?.strip_suffix(suffix)?.strip_suffix('_')?;
    let (x, y) = rest.split_once('_')?;
    Some(SurveyTileKey::new(x.parse().ok()?, y.parse().ok()?))
}

/// Decode one survey stream.
///
/// Records are consumed one survey row at a time with `read_exact`, which
/// also absorbs the short reads a gzip stream produces. Only the height field
/// is looked at and its digits are accumulated by hand; a space ends the
/// field, the decimal point is skipped.
pub fn parse_survey<R: Read>(
    key: SurveyTileKey,
    mut reader: R,
    size: usize,
    format: &SurveyFormat,
) -> Result<SurveyBuffer> {
    let field = format.height_offset..format.height_offset + format.height_width;
    let mut block = vec![0u8; format.line_length * size];
    let mut heights = vec![0.0f32; size * size];

    for file_row in 0..size {
        reader.read_exact(&mut block).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::MalformedSurvey {
                key,
                reason: format!("ends after {} of {} rows", file_row, size),
            },
            _ => Error::Io(e),
        })?;

        let out_row = size - 1 - file_row;
        let out = &mut heights[out_row * size..(out_row + 1) * size];
        for (column, (record, height)) in block
            .chunks_exact(format.line_length)
            .zip(out.iter_mut())
            .enumerate()
        {
            *height = decode_height(&record[field.clone()], format.height_divisor).ok_or_else(|| {
                Error::MalformedSurvey {
                    key,
                    reason: format!(
                        "bad height field {:?} in record {}",
                        String::from_utf8_lossy(&record[field.clone()]),
                        file_row * size + column
                    ),
                }
            })?;
        }
    }

    Ok(SurveyBuffer { key, size, heights })
}

#[inline]
fn decode_height(field: &[u8], divisor: f32) -> Option<f32> {
    let mut value: i32 = 0;
    let mut negative = false;
    for &byte in field {
        match byte {
            b'0'..=b'9' => value = value.checked_mul(10)?.checked_add((byte - b'0') as i32)?,
            b'.' => {}
            b'-' => negative = true,
            b' ' | b'\r' | b'\n' => break,
            _ => return None,
        }
    }
    let value = if negative { -value } else { value };
    Some(value as f32 / divisor)
}

/// Survey tiles present on disk, scanned once at startup
#[derive(Debug, Clone, Default)]
pub struct SurveyCatalog {
    available: HashSet<SurveyTileKey>,
}

impl SurveyCatalog {
    /// Scan `dir` for survey files. A missing directory yields an empty catalog.
    pub fn scan(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Self> {
        let mut available = HashSet::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Survey directory {} does not exist", dir.display());
                return Ok(Self { available });
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| parse_survey_file_name(n, prefix, suffix)) {
                available.insert(key);
            }
        }

        log::info!("Found {} survey tiles in {}", available.len(), dir.display());
        Ok(Self { available })
    }

    pub fn contains(&self, key: SurveyTileKey) -> bool {
        self.available.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SurveyTileKey> {
        self.available.iter()
    }
}

/// Reads survey tiles from the survey directory
#[derive(Debug)]
pub struct RawSurveyReader {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    size: usize,
    format: SurveyFormat,
    catalog: SurveyCatalog,
}

impl RawSurveyReader {
    /// Create a reader and scan its directory
    pub fn from_config(config: &TerrainConfig) -> Result<Self> {
        let catalog = SurveyCatalog::scan(&config.survey_dir, &config.survey_prefix, &config.survey_suffix)?;
        Ok(Self {
            dir: config.survey_dir.clone(),
            prefix: config.survey_prefix.clone(),
            suffix: config.survey_suffix.clone(),
            size: config.survey_size as usize,
            format: config.survey_format,
            catalog,
        })
    }

    /// Get the file path for a survey tile
    pub fn path(&self, key: SurveyTileKey) -> PathBuf {
        self.dir.join(survey_file_name(&self.prefix, &self.suffix, key))
    }

    pub fn catalog(&self) -> &SurveyCatalog {
        &self.catalog
    }
}

impl SurveySource for RawSurveyReader {
    fn read(&self, key: SurveyTileKey) -> Result<SurveyBuffer> {
        if !self.catalog.contains(key) {
            return Err(Error::SurveyNotFound(key));
        }

        let file = match File::open(self.path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::SurveyNotFound(key)),
            Err(e) => return Err(e.into()),
        };

        let start = Instant::now();
        let buffer = parse_survey(key, GzDecoder::new(file), self.size, &self.format)?;
        log::debug!("Read survey {} in {:.1?}", key, start.elapsed());
        Ok(buffer)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::write_survey;
    use super::*;

    fn record(height: &str) -> String {
        format!("{:>9} {:>10} {:<6}\r\n", "280000.00", "5660999.00", height)
    }

    #[test]
    fn test_survey_file_name_roundtrip() {
        let key = SurveyTileKey::new(346, 5674);
        let name = survey_file_name("dgm1_32", "1_nw", key);
        assert_eq!(name, "dgm1_32_346_5674_1_nw.xyz.gz");
        assert_eq!(parse_survey_file_name(&name, "dgm1_32", "1_nw"), Some(key));

        assert_eq!(parse_survey_file_name("dgm1_32_346_1_nw.xyz.gz", "dgm1_32", "1_nw"), None);
        assert_eq!(parse_survey_file_name("tile_10_0_0_0.f32.gz", "dgm1_32", "1_nw"), None);
    }

    #[test]
    fn test_decode_height() {
        assert_eq!(decode_height(b"74.52 ", 100.0), Some(74.52));
        assert_eq!(decode_height(b"123.45", 100.0), Some(123.45));
        assert_eq!(decode_height(b"-1.50 ", 100.0), Some(-1.5));
        assert_eq!(decode_height(b"      ", 100.0), Some(0.0));
        assert_eq!(decode_height(b"12,34 ", 100.0), None);
        assert_eq!(decode_height(b"999999999", 1.0), Some(999_999_999.0));
        assert_eq!(decode_height(b"9999999999", 1.0), None);
    }

    #[test]
    fn test_from_heights_rejects_wrong_length() {
        let key = SurveyTileKey::new(2, 3);
        let buffer = SurveyBuffer::from_heights(key, 2, vec![1.0; 4]).unwrap();
        assert_eq!(buffer.height(1, 1), 1.0);

        let result = SurveyBuffer::from_heights(key, 2, vec![1.0; 3]);
        assert!(matches!(result, Err(Error::MalformedSurvey { key: k, .. }) if k == key));
    }

    #[test]
    fn test_parse_flips_rows() {
        // 2x2 survey, file rows north to south
        let text = [record("1.00"), record("2.00"), record("3.00"), record("4.00")].concat();
        let key = SurveyTileKey::new(0, 0);
        let buffer = parse_survey(key, text.as_bytes(), 2, &SurveyFormat::default()).unwrap();

        assert_eq!(buffer.row(0), &[3.0, 4.0]);
        assert_eq!(buffer.row(1), &[1.0, 2.0]);
        assert_eq!(buffer.height(1, 1), 2.0);
    }

    #[test]
    fn test_parse_truncated_is_malformed() {
        let text = [record("1.00"), record("2.00"), record("3.00")].concat();
        let result = parse_survey(SurveyTileKey::new(0, 0), text.as_bytes(), 2, &SurveyFormat::default());
        assert!(matches!(result, Err(Error::MalformedSurvey { .. })));
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let text = record("ab.cd");
        let result = parse_survey(SurveyTileKey::new(0, 0), text.as_bytes(), 1, &SurveyFormat::default());
        assert!(matches!(result, Err(Error::MalformedSurvey { .. })));
    }

    #[test]
    fn test_reader_reads_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = TerrainConfig {
            survey_size: 4,
            ..TerrainConfig::with_data_dir(dir.path())
        };
        let key = SurveyTileKey::new(3, 7);
        write_survey(&config, key, |column, row| (row * 10 + column) as f32);

        let reader = RawSurveyReader::from_config(&config).unwrap();
        assert!(reader.catalog().contains(key));
        assert_eq!(reader.catalog().len(), 1);

        let buffer = reader.read(key).unwrap();
        assert_eq!(buffer.key(), key);
        // Buffer row 0 is the last (southernmost) file row
        assert_eq!(buffer.row(0), &[30.0, 31.0, 32.0, 33.0]);
        assert_eq!(buffer.row(3), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reader_missing_tile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = TerrainConfig {
            survey_size: 4,
            ..TerrainConfig::with_data_dir(dir.path())
        };

        let reader = RawSurveyReader::from_config(&config).unwrap();
        assert!(reader.catalog().is_empty());
        assert!(matches!(
            reader.read(SurveyTileKey::new(1, 1)),
            Err(Error::SurveyNotFound(k)) if k == SurveyTileKey::new(1, 1)
        ));
    }
}
