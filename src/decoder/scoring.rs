//! Per-token candidate scores for beam expansion.
//!
//! [`AcousticScorer`] uses the model's log-probabilities as they are.
//! [`LmFusionScorer`] adds shallow fusion with an n-gram model:
//!
//! ```text
//! combined = acoustic_logprob + alpha * lm_log10prob + beta
//! ```
//!
//! The n-gram state of a row is rebuilt from the start of the sampled
//! region on every call, so each expansion costs one lookup per sampled
//! token plus one per scored candidate.

use ndarray::{Array1, ArrayView1};

use crate::lm::{token_word, NgramScorer, END_OF_SENTENCE};
use crate::numeric::top_k;
use crate::task::OutOfCandidate;

// ---------------------------------------------------------------------------
// CandidateScorer trait
// ---------------------------------------------------------------------------

/// Scores every next token of one hypothesis row.
pub trait CandidateScorer {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Scores aligned with `logprobs` (`n_vocab` entries) for the row whose
    /// tokens so far are `prefix`.
    fn score_row(&self, prefix: &[u32], logprobs: ArrayView1<'_, f32>) -> Array1<f32>;
}

/// Plain acoustic log-probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcousticScorer;

impl CandidateScorer for AcousticScorer {
    fn name(&self) -> &'static str {
        "acoustic"
    }

    fn score_row(&self, _prefix: &[u32], logprobs: ArrayView1<'_, f32>) -> Array1<f32> {
        logprobs.to_owned()
    }
}

// ---------------------------------------------------------------------------
// LmFusionScorer
// ---------------------------------------------------------------------------

/// Which tokens receive LM fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateLimit {
    /// Every token in the vocabulary.
    FullVocabulary,
    /// Only the `n` best tokens by acoustic score.
    TopN {
        /// Subset size.
        n: usize,
        /// Treatment of the remaining tokens.
        out_of_candidate: OutOfCandidate,
    },
}

impl CandidateLimit {
    /// From the `select_candidates` / `out_of_candidate` options.
    pub fn from_options(select_candidates: Option<usize>, out_of_candidate: OutOfCandidate) -> Self {
        match select_candidates {
            Some(n) => Self::TopN {
                n,
                out_of_candidate,
            },
            None => Self::FullVocabulary,
        }
    }
}

/// Shallow fusion of acoustic and n-gram scores.
pub struct LmFusionScorer<S: NgramScorer> {
    lm: S,
    alpha: f32,
    beta: f32,
    sample_begin: usize,
    eot: u32,
    limit: CandidateLimit,
}

impl<S: NgramScorer> LmFusionScorer<S> {
    /// `sample_begin` is the length of the fixed prefix the LM never sees;
    /// `eot` separates text tokens (below) from specials.
    pub fn new(
        lm: S,
        alpha: f32,
        beta: f32,
        sample_begin: usize,
        eot: u32,
        limit: CandidateLimit,
    ) -> Self {
        Self {
            lm,
            alpha,
            beta,
            sample_begin,
            eot,
            limit,
        }
    }

    fn word(&self, token: u32) -> Option<String> {
        if token < self.eot {
            token_word(token)
        } else if token == self.eot {
            Some(END_OF_SENTENCE.to_string())
        } else {
            None
        }
    }

    /// LM state after the sampled text tokens of `prefix`.
    fn state_after(&self, prefix: &[u32]) -> S::State {
        let sampled = prefix.get(self.sample_begin..).unwrap_or(&[]);
        sampled
            .iter()
            .filter(|&&t| t < self.eot)
            .filter_map(|&t| token_word(t))
            .fold(self.lm.begin_state(), |state, word| self.lm.score(&state, &word).1)
    }
}

impl<S: NgramScorer> CandidateScorer for LmFusionScorer<S> {
    fn name(&self) -> &'static str {
        "lm_fusion"
    }

    fn score_row(&self, prefix: &[u32], logprobs: ArrayView1<'_, f32>) -> Array1<f32> {
        let state = self.state_after(prefix);

        let (mut scores, candidates): (Array1<f32>, Vec<usize>) = match self.limit {
            CandidateLimit::FullVocabulary => (logprobs.to_owned(), (0..logprobs.len()).collect()),
            CandidateLimit::TopN {
                n,
                out_of_candidate,
            } => {
                let base = match out_of_candidate {
                    OutOfCandidate::Exclude => Array1::from_elem(logprobs.len(), f32::NEG_INFINITY),
                    OutOfCandidate::Acoustic => logprobs.to_owned(),
                };
                let top = top_k(logprobs, n).into_iter().map(|(i, _)| i).collect();
                (base, top)
            }
        };

        for id in candidates {
            let acoustic = logprobs[id];
            if !acoustic.is_finite() {
                scores[id] = acoustic;
                continue;
            }
            scores[id] = match self.word(id as u32) {
                Some(word) => {
                    let (lm, _) = self.lm.score(&state, &word);
                    acoustic + self.alpha * lm + self.beta
                }
                None => acoustic,
            };
        }
        scores
    }
}
