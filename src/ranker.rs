//! Length-normalised ranking of finished candidates.

use ndarray::ArrayView1;

use crate::numeric::argmax;

// ---------------------------------------------------------------------------
// LengthPenalty
// ---------------------------------------------------------------------------

/// Divisor applied to a candidate's cumulative log-probability.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LengthPenalty {
    /// Divide by the raw length.
    #[default]
    Length,
    /// Google NMT: divide by `((5 + length) / 6) ^ alpha`.
    Gnmt(f32),
}

impl LengthPenalty {
    /// `None` selects plain length normalisation.
    pub fn from_option(alpha: Option<f32>) -> Self {
        alpha.map_or(Self::Length, Self::Gnmt)
    }

    /// Penalty factor for a candidate of `length` tokens.
    pub fn factor(&self, length: usize) -> f32 {
        match *self {
            Self::Length => length as f32,
            Self::Gnmt(alpha) => ((5.0 + length as f32) / 6.0).powf(alpha),
        }
    }

    /// Length-normalised score.
    pub fn apply(&self, logprob: f32, length: usize) -> f32 {
        logprob / self.factor(length)
    }
}

// ---------------------------------------------------------------------------
// SequenceRanker
// ---------------------------------------------------------------------------

/// Picks one candidate per audio.
pub trait SequenceRanker {
    /// `tokens[a]` and `sum_logprobs[a]` are the candidates of audio `a`;
    /// returns the selected index per audio.
    fn rank(&self, tokens: &[Vec<Vec<u32>>], sum_logprobs: &[Vec<f32>]) -> Vec<usize>;
}

/// Highest length-normalised log-probability wins; ties go to the first
/// candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumLikelihoodRanker {
    penalty: LengthPenalty,
}

impl MaximumLikelihoodRanker {
    /// `length_penalty` is the GNMT alpha, or `None` for length normalisation.
    pub fn new(length_penalty: Option<f32>) -> Self {
        Self {
            penalty: LengthPenalty::from_option(length_penalty),
        }
    }
}

impl SequenceRanker for MaximumLikelihoodRanker {
    fn rank(&self, tokens: &[Vec<Vec<u32>>], sum_logprobs: &[Vec<f32>]) -> Vec<usize> {
        tokens
            .iter()
            .zip(sum_logprobs)
            .map(|(candidates, logprobs)| {
                let scores: Vec<f32> = candidates
                    .iter()
                    .zip(logprobs)
                    .map(|(seq, &lp)| self.penalty.apply(lp, seq.len()))
                    .collect();
                argmax(ArrayView1::from(&scores[..]))
            })
            .collect()
    }
}
