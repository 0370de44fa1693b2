//! LRU cache for decoded survey buffers
//!
//! A decoded survey is ~4MB, and every lod-0 tile touches up to four of
//! them, so neighbours share buffers through this cache. When full, the
//! least recently used buffer is evicted. Tiles already built from an
//! evicted buffer keep their own copy of the heights.

use std::collections::HashMap;
use std::sync::Arc;

use crate::streaming::survey::SurveyBuffer;
use crate::terrain::SurveyTileKey;

/// LRU cache for survey buffers
pub struct SurveyCache {
    buffers: HashMap<SurveyTileKey, Arc<SurveyBuffer>>,
    /// Access order: oldest first, newest last
    access_order: Vec<SurveyTileKey>,
    /// Maximum number of buffers to keep, 0 disables caching
    max_buffers: usize,
}

impl SurveyCache {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            buffers: HashMap::with_capacity(max_buffers),
            access_order: Vec::with_capacity(max_buffers),
            max_buffers,
        }
    }

    /// Get a buffer and mark it as recently used
    pub fn get(&mut self, key: SurveyTileKey) -> Option<Arc<SurveyBuffer>> {
        let buffer = self.buffers.get(&key).cloned()?;
        self.touch(key);
        Some(buffer)
    }

    /// Insert a buffer, evicting the least recently used one if at capacity.
    ///
    /// Returns the evicted buffer, or the replaced one for an existing key.
    pub fn insert(&mut self, buffer: Arc<SurveyBuffer>) -> Option<Arc<SurveyBuffer>> {
        if self.max_buffers == 0 {
            return None;
        }
        let key = buffer.key();

        if let Some(replaced) = self.buffers.insert(key, buffer) {
            self.touch(key);
            return Some(replaced);
        }

        let evicted = if self.buffers.len() > self.max_buffers {
            self.evict_oldest()
        } else {
            None
        };
        self.access_order.push(key);
        evicted
    }

    pub fn remove(&mut self, key: SurveyTileKey) -> Option<Arc<SurveyBuffer>> {
        self.remove_from_access_order(key);
        self.buffers.remove(&key)
    }

    pub fn contains(&self, key: SurveyTileKey) -> bool {
        self.buffers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_buffers
    }

    /// Evict the least recently used buffer
    pub fn evict_oldest(&mut self) -> Option<Arc<SurveyBuffer>> {
        let key = self.access_order.first().copied()?;
        self.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SurveyTileKey> {
        self.buffers.keys()
    }

    fn touch(&mut self, key: SurveyTileKey) {
        self.remove_from_access_order(key);
        self.access_order.push(key);
    }

    fn remove_from_access_order(&mut self, key: SurveyTileKey) {
        if let Some(pos) = self.access_order.iter().position(|&k| k == key) {
            self.access_order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_buffer(x: i32, y: i32) -> Arc<SurveyBuffer> {
        let key = SurveyTileKey::new(x, y);
        Arc::new(SurveyBuffer::from_heights(key, 2, vec![x as f32; 4]).unwrap())
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = SurveyCache::new(4);
        assert!(cache.is_empty());

        cache.insert(make_buffer(1, 2));
        let buffer = cache.get(SurveyTileKey::new(1, 2)).unwrap();
        assert_eq!(buffer.key(), SurveyTileKey::new(1, 2));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(SurveyTileKey::new(2, 1)).is_none());
    }

    #[test]
    fn test_cache_replace_keeps_len() {
        let mut cache = SurveyCache::new(4);
        assert!(cache.insert(make_buffer(1, 0)).is_none());
        let replaced = cache.insert(make_buffer(1, 0));
        assert_eq!(replaced.unwrap().key(), SurveyTileKey::new(1, 0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = SurveyCache::new(3);
        cache.insert(make_buffer(1, 0));
        cache.insert(make_buffer(2, 0));
        cache.insert(make_buffer(3, 0));

        let evicted = cache.insert(make_buffer(4, 0));
        assert_eq!(evicted.unwrap().key(), SurveyTileKey::new(1, 0));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(SurveyTileKey::new(1, 0)));
        assert!(cache.contains(SurveyTileKey::new(4, 0)));
    }

    #[test]
    fn test_cache_get_updates_order() {
        let mut cache = SurveyCache::new(3);
        cache.insert(make_buffer(1, 0));
        cache.insert(make_buffer(2, 0));
        cache.insert(make_buffer(3, 0));

        cache.get(SurveyTileKey::new(1, 0));

        let evicted = cache.insert(make_buffer(4, 0));
        assert_eq!(evicted.unwrap().key(), SurveyTileKey::new(2, 0));
        assert!(cache.contains(SurveyTileKey::new(1, 0)));
    }

    #[test]
    fn test_evicted_buffer_stays_alive_for_holders() {
        let mut cache = SurveyCache::new(1);
        cache.insert(make_buffer(5, 5));
        let held = cache.get(SurveyTileKey::new(5, 5)).unwrap();

        cache.insert(make_buffer(6, 6));
        assert!(!cache.contains(SurveyTileKey::new(5, 5)));
        assert_eq!(held.heights()[0], 5.0);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let mut cache = SurveyCache::new(0);
        assert!(cache.insert(make_buffer(1, 1)).is_none());
        assert!(cache.is_empty());
        assert!(cache.evict_oldest().is_none());
    }
}
