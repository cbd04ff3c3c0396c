//! Key/value cache for incremental decoding.
//!
//! Each entry holds one attention projection for every hypothesis row,
//! shaped `(rows, positions, features)`.  Row `i` of every entry belongs to
//! row `i` of the hypothesis batch; [`KvCache::rearrange`] is the only way
//! rows are reordered.

use std::collections::BTreeMap;

use ndarray::{concatenate, Array3, Axis};

use crate::error::{DecodeError, Result};

/// Which projection an entry caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Projection {
    /// Attention key projection.
    Key,
    /// Attention value projection.
    Value,
}

/// Identity of a cached module: decoder layer plus projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Decoder block index.
    pub layer: usize,
    /// Key or value.
    pub projection: Projection,
}

impl CacheKey {
    /// Key projection of `layer`.
    pub fn key(layer: usize) -> Self {
        Self {
            layer,
            projection: Projection::Key,
        }
    }

    /// Value projection of `layer`.
    pub fn value(layer: usize) -> Self {
        Self {
            layer,
            projection: Projection::Value,
        }
    }
}

// ---------------------------------------------------------------------------
// KvCache
// ---------------------------------------------------------------------------

/// Per-module cached projections for all hypothesis rows.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    entries: BTreeMap<CacheKey, Array3<f32>>,
}

impl KvCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached projection for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<&Array3<f32>> {
        self.entries.get(key)
    }

    /// Append `new` (shape `(rows, new_positions, features)`) along the
    /// position axis, creating the entry on first use.
    pub fn append(&mut self, key: CacheKey, new: Array3<f32>) -> Result<()> {
        let merged = match self.entries.remove(&key) {
            Some(existing) => concatenate(Axis(1), &[existing.view(), new.view()])?,
            None => new,
        };
        self.entries.insert(key, merged);
        Ok(())
    }

    /// Reorder rows of every entry so that new row `i` is old row
    /// `source_indices[i]`.  Rows not referenced are dropped; rows referenced
    /// twice are duplicated.
    ///
    /// Every index is checked against every entry before any entry changes,
    /// so a failed call leaves the cache untouched.
    pub fn rearrange(&mut self, source_indices: &[usize]) -> Result<()> {
        for (key, tensor) in &self.entries {
            let rows = tensor.len_of(Axis(0));
            if let Some(&bad) = source_indices.iter().find(|&&i| i >= rows) {
                return Err(DecodeError::Model(format!(
                    "cache rearrangement index {bad} out of range for {rows} rows (layer {})",
                    key.layer
                )));
            }
        }
        for tensor in self.entries.values_mut() {
            *tensor = tensor.select(Axis(0), source_indices);
        }
        Ok(())
    }

    /// Number of hypothesis rows cached (0 when empty).
    pub fn rows(&self) -> usize {
        self.entries
            .values()
            .next()
            .map_or(0, |t| t.len_of(Axis(0)))
    }

    /// Number of cached positions (0 when empty).
    pub fn positions(&self) -> usize {
        self.entries
            .values()
            .next()
            .map_or(0, |t| t.len_of(Axis(1)))
    }

    /// `true` when nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Cache whose row `i` carries the marker value `i` at every position.
    fn marked_cache(rows: usize) -> KvCache {
        let mut cache = KvCache::new();
        let t = Array3::from_shape_fn((rows, 2, 3), |(r, _, _)| r as f32);
        cache.append(CacheKey::key(0), t.clone()).unwrap();
        cache.append(CacheKey::value(0), t).unwrap();
        cache
    }

    #[test]
    fn append_grows_position_axis() {
        let mut cache = marked_cache(2);
        cache
            .append(CacheKey::key(0), Array3::zeros((2, 1, 3)))
            .unwrap();
        assert_eq!(cache.get(&CacheKey::key(0)).unwrap().shape(), &[2, 3, 3]);
        assert_eq!(cache.rows(), 2);
    }

    #[test]
    fn rearrange_moves_markers_with_the_permutation() {
        let mut cache = marked_cache(4);
        let perm = [2, 2, 0, 3];
        cache.rearrange(&perm).unwrap();
        for key in [CacheKey::key(0), CacheKey::value(0)] {
            let t = cache.get(&key).unwrap();
            for (row, &src) in perm.iter().enumerate() {
                assert!(t.index_axis(Axis(0), row).iter().all(|&v| v == src as f32));
            }
        }
    }

    #[test]
    fn rearrange_rejects_out_of_range_rows() {
        let mut cache = marked_cache(2);
        assert!(cache.rearrange(&[0, 5]).is_err());
    }

    #[test]
    fn failed_rearrange_leaves_every_entry_untouched() {
        // Layer 0 sorts first and accepts the indices; layer 1 rejects them.
        let mut cache = KvCache::new();
        let wide = Array3::from_shape_fn((4, 1, 1), |(r, _, _)| r as f32);
        cache.append(CacheKey::key(0), wide.clone()).unwrap();
        cache.append(CacheKey::key(1), Array3::zeros((2, 1, 1))).unwrap();

        assert!(cache.rearrange(&[3, 1]).is_err());
        assert_eq!(cache.get(&CacheKey::key(0)).unwrap(), &wide);
        assert_eq!(cache.get(&CacheKey::key(1)).unwrap().len_of(Axis(0)), 2);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = marked_cache(2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.rows(), 0);
    }
}
