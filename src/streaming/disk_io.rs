//! Tile serialization and disk I/O
//!
//! A persisted tile is the gzip-compressed array of its `size²` heights as
//! raw 32-bit floats, row-major, without header. File names encode the base
//! tile size so caches built with a different size are never picked up:
//! `tile_{log2(size)}_{x}_{y}_{lod}.f32.gz`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use dashmap::DashSet;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::core::{Error, Result, TerrainConfig};
use crate::terrain::TileKey;

const TILE_EXTENSION: &str = ".f32.gz";

/// Dense heights of one resolved tile. Immutable once published.
#[derive(Clone, PartialEq)]
pub struct Tile {
    key: TileKey,
    size: usize,
    heights: Vec<f32>,
    /// False if some source data was missing while building the tile
    complete: bool,
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("complete", &self.complete)
            .finish()
    }
}

impl Tile {
    /// Heights always come from a `size²` kernel or a `size²` file read
    pub(crate) fn new(key: TileKey, size: usize, heights: Vec<f32>, complete: bool) -> Self {
        debug_assert_eq!(heights.len(), size * size, "tile must be size x size");
        Self {
            key,
            size,
            heights,
            complete,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Edge length in samples
    pub fn size(&self) -> usize {
        self.size
    }

    /// Row-major heights, row 0 = lowest z
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn height(&self, column: usize, row: usize) -> f32 {
        self.heights[row * self.size + column]
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// File name of a persisted tile
pub fn tile_file_name(base_log2: u32, key: TileKey) -> String {
    format!("tile_{}_{}_{}_{}{}", base_log2, key.x, key.y, key.lod, TILE_EXTENSION)
}

/// Parse a persisted tile name, ignoring tiles of another base size
pub fn parse_tile_file_name(name: &str, base_log2: u32) -> Option<TileKey> {
    let stem = name.strip_prefix("tile_")?.strip_suffix(TILE_EXTENSION)?;
    let mut parts = stem.split('_');
    let log2: u32 = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let lod = parts.next()?.parse().ok()?;
    if parts.next().is_some() || log2 != base_log2 {
        return None;
    }
    Some(TileKey::new(x, y, lod))
}

/// Encode heights as gzip-compressed raw floats
pub fn write_tile<W: Write>(writer: W, heights: &[f32]) -> io::Result<()> {
    let mut encoder = GzEncoder::new(writer, Compression::fast());
    encoder.write_all(bytemuck::cast_slice(heights))?;
    encoder.finish()?.flush()
}

/// Decode exactly `size²` heights, rejecting short or oversized payloads
pub fn read_tile<R: Read>(reader: R, size: usize) -> io::Result<Vec<f32>> {
    let mut decoder = GzDecoder::new(reader);
    let mut bytes = vec![0u8; size * size * std::mem::size_of::<f32>()];
    // read_exact loops over the short reads a gzip stream produces
    decoder.read_exact(&mut bytes)?;

    let mut trailing = [0u8; 1];
    if decoder.read(&mut trailing)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "payload is longer than one tile",
        ));
    }

    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Persisted tile directory with an in-memory existence index
#[derive(Debug)]
pub struct TileStore {
    dir: PathBuf,
    base_tile_size: usize,
    base_log2: u32,
    /// Keys with a fully written file on disk
    index: DashSet<TileKey>,
}

impl TileStore {
    /// Open (creating if needed) a tile directory and index its contents
    pub fn open(dir: impl Into<PathBuf>, base_tile_size: u32) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let base_log2 = base_tile_size.trailing_zeros();
        let index = DashSet::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(key) = entry.file_name().to_str().and_then(|n| parse_tile_file_name(n, base_log2)) {
                index.insert(key);
            }
        }
        log::info!("Indexed {} persisted tiles in {}", index.len(), dir.display());

        Ok(Self {
            dir,
            base_tile_size: base_tile_size as usize,
            base_log2,
            index,
        })
    }

    pub fn from_config(config: &TerrainConfig) -> Result<Self> {
        Self::open(&config.tile_dir, config.base_tile_size)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: TileKey) -> PathBuf {
        self.dir.join(tile_file_name(self.base_log2, key))
    }

    /// Check the index, never the filesystem
    pub fn exists(&self, key: TileKey) -> bool {
        self.index.contains(&key)
    }

    /// Number of persisted tiles
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Load a persisted tile. Persisted tiles are always complete.
    pub fn load(&self, key: TileKey) -> Result<Tile> {
        let corrupt = |reason: String| Error::PersistedTileCorrupt { key, reason };

        let file = File::open(self.path(key)).map_err(|e| corrupt(e.to_string()))?;
        let heights = read_tile(BufReader::new(file), self.base_tile_size).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => corrupt("short read".to_string()),
            _ => corrupt(e.to_string()),
        })?;

        Ok(Tile::new(key, self.base_tile_size, heights, true))
    }

    /// Persist a tile, then record it in the index.
    ///
    /// The payload goes to a `.tmp` file first and is renamed into place, so a
    /// failed write never leaves a partial tile under the final name.
    pub fn save(&self, tile: &Tile) -> Result<()> {
        let key = tile.key();
        let path = self.path(key);
        let tmp = path.with_extension("tmp");

        let write = || -> io::Result<()> {
            let file = File::create(&tmp)?;
            write_tile(BufWriter::new(file), tile.heights())?;
            std::fs::rename(&tmp, &path)
        };
        if let Err(source) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::PersistWrite { key, source });
        }

        self.index.insert(key);
        Ok(())
    }

    /// Delete a persisted tile and drop it from the index
    pub fn remove(&self, key: TileKey) -> Result<()> {
        self.index.remove(&key);
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_tile(key: TileKey, size: usize) -> Tile {
        let heights = (0..size * size).map(|i| i as f32 * 0.25 - 3.0).collect();
        Tile::new(key, size, heights, true)
    }

    #[test]
    fn test_tile_file_name() {
        let key = TileKey::new(-3, 7, 2);
        let name = tile_file_name(10, key);
        assert_eq!(name, "tile_10_-3_7_2.f32.gz");
        assert_eq!(parse_tile_file_name(&name, 10), Some(key));

        // Other base size, other files
        assert_eq!(parse_tile_file_name(&name, 9), None);
        assert_eq!(parse_tile_file_name("tile_10_1_2.f32.gz", 10), None);
        assert_eq!(parse_tile_file_name("tile_10_1_2_0.f32.tmp", 10), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::open(dir.path(), 8).unwrap();
        let key = TileKey::new(1, -2, 0);
        let tile = ramp_tile(key, 8);

        assert!(!store.exists(key));
        store.save(&tile).unwrap();
        assert!(store.exists(key));
        assert!(!dir.path().join("tile_3_1_-2_0.f32.tmp").exists());

        let loaded = store.load(key).unwrap();
        assert_eq!(loaded, tile);
        assert!(loaded.is_complete());
    }

    #[test]
    fn test_index_built_at_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TileStore::open(dir.path(), 4).unwrap();
            store.save(&ramp_tile(TileKey::new(0, 0, 0), 4)).unwrap();
            store.save(&ramp_tile(TileKey::new(0, 0, 1), 4)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a tile").unwrap();

        let store = TileStore::open(dir.path(), 4).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.exists(TileKey::new(0, 0, 1)));

        // Different base size ignores them
        let other = TileStore::open(dir.path(), 8).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_short_tile_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let key = TileKey::new(0, 0, 0);
        let path = dir.path().join(tile_file_name(2, key));
        write_tile(File::create(&path).unwrap(), &[1.0; 10]).unwrap();

        let store = TileStore::open(dir.path(), 4).unwrap();
        assert!(store.exists(key));
        assert!(matches!(store.load(key), Err(Error::PersistedTileCorrupt { .. })));
    }

    #[test]
    fn test_garbage_tile_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let key = TileKey::new(5, 5, 0);
        std::fs::write(dir.path().join(tile_file_name(2, key)), b"definitely not gzip").unwrap();

        let store = TileStore::open(dir.path(), 4).unwrap();
        assert!(matches!(store.load(key), Err(Error::PersistedTileCorrupt { .. })));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut bytes = Vec::new();
        write_tile(&mut bytes, &[0.5; 17]).unwrap();
        assert!(read_tile(bytes.as_slice(), 4).is_err());
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::open(dir.path(), 4).unwrap();
        let tile = ramp_tile(TileKey::new(2, 2, 0), 4);
        store.save(&tile).unwrap();

        store.remove(tile.key()).unwrap();
        assert!(!store.exists(tile.key()));
        assert!(!store.path(tile.key()).exists());
        // Removing again is fine
        store.remove(tile.key()).unwrap();
    }
}
