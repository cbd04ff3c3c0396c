//! Inference boundary toward the external encoder/decoder model.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ WhisperModel (trait, external)                         │
//! │   encode_audio(mel)            → audio features        │
//! │   forward(tokens, feats, cache) → logits, appends cache │
//! └───────────────────────────┬────────────────────────────┘
//!                             │
//!               ┌─────────────▼─────────────┐
//!               │ CachedInference            │
//!               │ - installs KvCache lazily  │
//!               │ - feeds only the newest    │
//!               │   token after step one     │
//!               │ - rearrange_cache(perm)    │
//!               └─────────────┬─────────────┘
//!                             │ Drop
//!               ┌─────────────▼─────────────┐
//!               │ CleanupGuard → cleanup()   │
//!               └───────────────────────────┘
//! ```
//!
//! The key/value cache is touched in exactly two ways: appended to by the
//! model inside `forward`, and row-permuted by [`Inference::rearrange_cache`].

pub mod cache;

use std::ops::{Deref, DerefMut};

use ndarray::{Array2, Array3};

use crate::batch::TokenBatch;
use crate::error::Result;

pub use cache::{CacheKey, KvCache, Projection};

/// Seconds of audio covered by one encoder window.
pub const CHUNK_LENGTH: f32 = 30.0;

// ---------------------------------------------------------------------------
// Model contract
// ---------------------------------------------------------------------------

/// Shape parameters of the external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    /// Encoder output positions (1500 for a 30 s window).
    pub n_audio_ctx: usize,
    /// Encoder output width.
    pub n_audio_state: usize,
    /// Maximum decoder context in tokens.
    pub n_text_ctx: usize,
    /// Vocabulary size.
    pub n_vocab: usize,
}

impl ModelDims {
    /// Seconds per timestamp step (`CHUNK_LENGTH / n_audio_ctx`, usually 0.02).
    pub fn timestamp_precision(&self) -> f32 {
        CHUNK_LENGTH / self.n_audio_ctx as f32
    }
}

/// Numeric precision requested for the encoder pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Half precision.
    Half,
    /// Single precision.
    Full,
}

/// The external acoustic model.
///
/// `forward` receives only the token columns the cache has not seen yet and
/// must append its per-layer projections for those columns to `cache`.
pub trait WhisperModel {
    /// Model dimensions.
    fn dims(&self) -> ModelDims;

    /// Run the encoder on `(n_audio, n_mels, n_frames)` spectrograms.
    fn encode_audio(&self, mel: &Array3<f32>, precision: Precision) -> Result<Array3<f32>>;

    /// Decoder forward pass.
    ///
    /// `tokens` is `(rows, new_positions)`, `audio_features` is
    /// `(rows, n_audio_ctx, n_audio_state)`.  Returns unnormalised scores
    /// `(rows, new_positions, n_vocab)`.
    fn forward(
        &self,
        tokens: &Array2<u32>,
        audio_features: &Array3<f32>,
        cache: &mut KvCache,
    ) -> Result<Array3<f32>>;
}

// ---------------------------------------------------------------------------
// Inference trait
// ---------------------------------------------------------------------------

/// Forward pass plus cache maintenance, as seen by the search.
pub trait Inference {
    /// Per-position logits `(rows, positions, n_vocab)` for the current batch.
    /// Consumers use only the last position.
    fn logits(&mut self, tokens: &TokenBatch, audio_features: &Array3<f32>) -> Result<Array3<f32>>;

    /// Reorder cached rows so row `i` becomes old row `source_indices[i]`.
    fn rearrange_cache(&mut self, source_indices: &[usize]) -> Result<()>;

    /// Release the cache.  Called once per decoding run.
    fn cleanup(&mut self);
}

// ---------------------------------------------------------------------------
// CachedInference
// ---------------------------------------------------------------------------

/// [`Inference`] over a [`WhisperModel`] with an incremental key/value cache.
pub struct CachedInference<'m> {
    model: &'m dyn WhisperModel,
    initial_token_length: usize,
    cache: Option<KvCache>,
}

impl<'m> CachedInference<'m> {
    /// `initial_token_length` is the length of the fixed prompt; longer
    /// batches are fed one column at a time.
    pub fn new(model: &'m dyn WhisperModel, initial_token_length: usize) -> Self {
        Self {
            model,
            initial_token_length,
            cache: None,
        }
    }

    /// The installed cache, if a forward pass has happened since the last
    /// cleanup.
    pub fn cache(&self) -> Option<&KvCache> {
        self.cache.as_ref()
    }
}

impl Inference for CachedInference<'_> {
    fn logits(&mut self, tokens: &TokenBatch, audio_features: &Array3<f32>) -> Result<Array3<f32>> {
        let cache = self.cache.get_or_insert_with(|| {
            log::trace!("inference: installing kv cache");
            KvCache::new()
        });

        let columns = if tokens.seq_len() > self.initial_token_length {
            1
        } else {
            tokens.seq_len()
        };
        let input = tokens.tail(columns)?;
        self.model.forward(&input, audio_features, cache)
    }

    fn rearrange_cache(&mut self, source_indices: &[usize]) -> Result<()> {
        let identity = source_indices.iter().enumerate().all(|(i, &s)| i == s);
        let same_rows = self.cache.as_ref().map_or(true, |c| c.rows() == source_indices.len());
        if identity && same_rows {
            return Ok(());
        }
        match self.cache.as_mut() {
            Some(cache) => cache.rearrange(source_indices),
            None => Ok(()),
        }
    }

    fn cleanup(&mut self) {
        if self.cache.take().is_some() {
            log::trace!("inference: kv cache released");
        }
    }
}

// ---------------------------------------------------------------------------
// CleanupGuard
// ---------------------------------------------------------------------------

/// Scoped access to an [`Inference`]; calls [`Inference::cleanup`] exactly
/// once when dropped, on success and error paths alike.
pub struct CleanupGuard<'a, I: Inference + ?Sized> {
    inner: &'a mut I,
}

impl<'a, I: Inference + ?Sized> CleanupGuard<'a, I> {
    /// Take scoped ownership of `inner`.
    pub fn new(inner: &'a mut I) -> Self {
        Self { inner }
    }
}

impl<I: Inference + ?Sized> Deref for CleanupGuard<'_, I> {
    type Target = I;

    fn deref(&self) -> &I {
        self.inner
    }
}

impl<I: Inference + ?Sized> DerefMut for CleanupGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut I {
        self.inner
    }
}

impl<I: Inference + ?Sized> Drop for CleanupGuard<'_, I> {
    fn drop(&mut self) {
        self.inner.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::DecodeError;

    /// Records the width of every token block it is fed.
    struct WidthRecorder {
        widths: RefCell<Vec<usize>>,
    }

    impl WhisperModel for WidthRecorder {
        fn dims(&self) -> ModelDims {
            ModelDims {
                n_audio_ctx: 1500,
                n_audio_state: 2,
                n_text_ctx: 8,
                n_vocab: 4,
            }
        }

        fn encode_audio(&self, mel: &Array3<f32>, _: Precision) -> Result<Array3<f32>> {
            Ok(mel.clone())
        }

        fn forward(
            &self,
            tokens: &Array2<u32>,
            _: &Array3<f32>,
            cache: &mut KvCache,
        ) -> Result<Array3<f32>> {
            self.widths.borrow_mut().push(tokens.ncols());
            let (rows, cols) = tokens.dim();
            let marks = Array3::from_shape_fn((rows, cols, 1), |(r, _, _)| r as f32);
            cache.append(CacheKey::key(0), marks)?;
            Ok(Array3::zeros((rows, cols, 4)))
        }
    }

    fn features(rows: usize) -> Array3<f32> {
        Array3::zeros((rows, 1, 1))
    }

    #[test]
    fn first_pass_sees_full_prompt_then_single_columns() {
        let model = WidthRecorder {
            widths: RefCell::new(Vec::new()),
        };
        let mut inf = CachedInference::new(&model, 3);
        let mut batch = TokenBatch::repeat(&[1, 2, 3], 2);
        inf.logits(&batch, &features(2)).unwrap();
        batch.push_column(&[0, 0]);
        inf.logits(&batch, &features(2)).unwrap();
        assert_eq!(*model.widths.borrow(), vec![3, 1]);
        assert_eq!(inf.cache().unwrap().positions(), 4);
    }

    #[test]
    fn rearrange_follows_permutation_and_identity_is_noop() {
        let model = WidthRecorder {
            widths: RefCell::new(Vec::new()),
        };
        let mut inf = CachedInference::new(&model, 1);
        inf.logits(&TokenBatch::repeat(&[1], 3), &features(3)).unwrap();

        inf.rearrange_cache(&[0, 1, 2]).unwrap();
        let before = inf.cache().unwrap().get(&CacheKey::key(0)).unwrap().clone();
        assert_eq!(before[[2, 0, 0]], 2.0);

        inf.rearrange_cache(&[2, 0, 0]).unwrap();
        let after = inf.cache().unwrap().get(&CacheKey::key(0)).unwrap();
        assert_eq!(after[[0, 0, 0]], 2.0);
        assert_eq!(after[[1, 0, 0]], 0.0);
        assert_eq!(after[[2, 0, 0]], 0.0);
    }

    struct CountingInference {
        cleanups: usize,
    }

    impl Inference for CountingInference {
        fn logits(&mut self, _: &TokenBatch, _: &Array3<f32>) -> Result<Array3<f32>> {
            Err(DecodeError::Model("forward pass failed".into()))
        }

        fn rearrange_cache(&mut self, _: &[usize]) -> Result<()> {
            Ok(())
        }

        fn cleanup(&mut self) {
            self.cleanups += 1;
        }
    }

    #[test]
    fn guard_cleans_up_once_on_error_path() {
        let mut inner = CountingInference { cleanups: 0 };
        let outcome: Result<()> = (|| {
            let mut guard = CleanupGuard::new(&mut inner);
            guard.logits(&TokenBatch::repeat(&[1], 1), &features(1))?;
            Ok(())
        })();
        assert!(outcome.is_err());
        assert_eq!(inner.cleanups, 1);
    }

    #[test]
    fn cleanup_releases_cache() {
        let model = WidthRecorder {
            widths: RefCell::new(Vec::new()),
        };
        let mut inf = CachedInference::new(&model, 1);
        inf.logits(&TokenBatch::repeat(&[1], 1), &features(1)).unwrap();
        inf.cleanup();
        assert!(inf.cache().is_none());
    }
}
