//! Token decoders: the search strategy behind the sampling loop.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!                  │ TokenDecoder (trait)          │
//!                  │   reset / update / finalize   │
//!                  └──────────────┬───────────────┘
//!            ┌────────────────────┴────────────────────┐
//!            ▼                                         ▼
//!   GreedyDecoder                          BeamSearchDecoder<S: CandidateScorer>
//!   - arg-max at T = 0                     - top (beam + 1) expansion per row
//!   - seeded categorical at T > 0          - dedup + stable sort per audio
//!   - frozen rows stay at eot              - rearrange_cache(source rows)
//!                                          - bounded FinishedSet per audio
//!                                                      │
//!                                   ┌──────────────────┴───────────────────┐
//!                                   ▼                                      ▼
//!                             AcousticScorer                   LmFusionScorer<NgramScorer>
//!                             (log-softmax)                    lp + α·lm + β, optional top-N
//! ```
//!
//! A task picks one variant at construction; the sampling loop only sees
//! `Box<dyn TokenDecoder>`.

pub mod beam;
pub mod greedy;
pub mod scoring;

use ndarray::Array2;

use crate::batch::TokenBatch;
use crate::error::Result;
use crate::inference::Inference;

pub use beam::{BeamSearchDecoder, FinishedSet};
pub use greedy::GreedyDecoder;
pub use scoring::{AcousticScorer, CandidateLimit, CandidateScorer, LmFusionScorer};

/// Finished candidates of one audio input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    /// Complete token sequences, each ending in end-of-text.
    pub tokens: Vec<Vec<u32>>,
    /// Cumulative log-probability of each sequence.
    pub sum_logprobs: Vec<f32>,
}

// ---------------------------------------------------------------------------
// TokenDecoder trait
// ---------------------------------------------------------------------------

/// A search strategy over next-token distributions.
pub trait TokenDecoder {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Forget all per-call state.  Called before every decoding run.
    fn reset(&mut self);

    /// Extend the hypotheses by one token.
    ///
    /// `logits` is `(rows, n_vocab)` for the last position, already filtered.
    /// `sum_logprobs` holds one cumulative score per row and is updated in
    /// place; it is replaced wholesale when the decoder reorders rows, in
    /// which case the decoder also rearranges the inference cache.
    ///
    /// Returns the new batch and whether decoding is complete.
    fn update(
        &mut self,
        tokens: TokenBatch,
        logits: &Array2<f32>,
        sum_logprobs: &mut Vec<f32>,
        inference: &mut dyn Inference,
    ) -> Result<(TokenBatch, bool)>;

    /// Complete sequences per audio.
    ///
    /// `groups[a]` holds the current rows of audio `a`; `sum_logprobs` is the
    /// flat per-row score vector.
    fn finalize(&mut self, groups: Vec<Vec<Vec<u32>>>, sum_logprobs: &[f32])
        -> Result<Vec<Candidates>>;
}
