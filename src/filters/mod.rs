//! Logit filter pipeline.
//!
//! # Architecture
//!
//! ```text
//! logits (rows × n_vocab, exclusively borrowed for one step)
//!   │
//!   ├─► SuppressBlank        (first sampled position only)
//!   ├─► SuppressTokens       (every step)
//!   ├─► BoostTokens          (optional hotword bonus)
//!   └─► ApplyTimestampRules  (unless without_timestamps)
//!   │
//!   ▼
//! masked logits → TokenDecoder::update
//! ```
//!
//! Filters are stateless across steps: everything they need comes from the
//! hypothesis batch handed to [`LogitFilter::apply`].

pub mod boost;
pub mod suppress;
pub mod timestamps;

use ndarray::{s, Array2};

use crate::batch::TokenBatch;

pub use boost::BoostTokens;
pub use suppress::{SuppressBlank, SuppressTokens};
pub use timestamps::ApplyTimestampRules;

// ---------------------------------------------------------------------------
// LogitFilter trait
// ---------------------------------------------------------------------------

/// One rule applied in place to the next-token logits.
pub trait LogitFilter {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Mutate `logits` (`rows × n_vocab`) given the current hypotheses.
    fn apply(&self, logits: &mut Array2<f32>, tokens: &TokenBatch);
}

// ---------------------------------------------------------------------------
// FilterPipeline
// ---------------------------------------------------------------------------

/// Ordered list of filters.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn LogitFilter>>,
}

impl FilterPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter; filters run in insertion order.
    pub fn push(&mut self, filter: impl LogitFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Run every filter in order.
    pub fn apply(&self, logits: &mut Array2<f32>, tokens: &TokenBatch) {
        for filter in &self.filters {
            filter.apply(logits, tokens);
        }
    }

    /// Filter names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Set `ids` to `-inf` in every row.  Ids beyond the vocabulary are ignored.
pub(crate) fn mask_columns(logits: &mut Array2<f32>, ids: &[u32]) {
    let n_vocab = logits.ncols();
    for &id in ids {
        let id = id as usize;
        if id < n_vocab {
            logits.column_mut(id).fill(f32::NEG_INFINITY);
        }
    }
}

/// Set the half-open id range `[from, to)` of one row to `-inf`, clamped to
/// the vocabulary.
pub(crate) fn mask_range(logits: &mut Array2<f32>, row: usize, from: usize, to: usize) {
    let to = to.min(logits.ncols());
    if from < to {
        logits.slice_mut(s![row, from..to]).fill(f32::NEG_INFINITY);
    }
}
