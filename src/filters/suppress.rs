//! Blank and explicit token suppression.

use ndarray::Array2;

use super::{mask_columns, LogitFilter};
use crate::batch::TokenBatch;
use crate::task::SuppressList;
use crate::tokenizer::Tokenizer;

// ---------------------------------------------------------------------------
// SuppressBlank
// ---------------------------------------------------------------------------

/// Forbids the space token(s) and end-of-text at the first sampled position.
pub struct SuppressBlank {
    blank_tokens: Vec<u32>,
    sample_begin: usize,
}

impl SuppressBlank {
    /// `sample_begin` is the length of the fixed prefix.
    pub fn new(tokenizer: &dyn Tokenizer, sample_begin: usize) -> Self {
        let mut blank_tokens = tokenizer.encode(" ");
        blank_tokens.push(tokenizer.special_tokens().eot);
        Self {
            blank_tokens,
            sample_begin,
        }
    }
}

impl LogitFilter for SuppressBlank {
    fn name(&self) -> &'static str {
        "suppress_blank"
    }

    fn apply(&self, logits: &mut Array2<f32>, tokens: &TokenBatch) {
        if tokens.seq_len() == self.sample_begin {
            mask_columns(logits, &self.blank_tokens);
        }
    }
}

// ---------------------------------------------------------------------------
// SuppressTokens
// ---------------------------------------------------------------------------

/// Forbids a fixed set of ids at every step.
pub struct SuppressTokens {
    ids: Vec<u32>,
}

impl SuppressTokens {
    /// Use exactly `ids` (sorted, deduplicated).
    pub fn new(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Resolve a [`SuppressList`] against a tokenizer.
    ///
    /// Returns `None` for an empty list.  Otherwise the explicit ids, plus
    /// the non-speech set when requested, plus the task, start-of-transcript,
    /// start-of-prev, start-of-lm and no-speech tokens.
    pub fn resolve(list: &SuppressList, tokenizer: &dyn Tokenizer) -> Option<Self> {
        if list.is_empty() {
            return None;
        }
        let special = tokenizer.special_tokens();
        let mut ids = list.ids.clone();
        if list.non_speech {
            ids.extend(tokenizer.non_speech_tokens());
        }
        ids.extend([
            special.transcribe,
            special.translate,
            special.sot,
            special.sot_prev,
            special.sot_lm,
        ]);
        ids.extend(special.no_speech);
        Some(Self::new(ids))
    }

    /// The resolved ids, ascending.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }
}

impl LogitFilter for SuppressTokens {
    fn name(&self) -> &'static str {
        "suppress_tokens"
    }

    fn apply(&self, logits: &mut Array2<f32>, _tokens: &TokenBatch) {
        mask_columns(logits, &self.ids);
    }
}
