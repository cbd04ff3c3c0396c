//! Greedy / temperature sampling.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Candidates, TokenDecoder};
use crate::batch::TokenBatch;
use crate::error::Result;
use crate::inference::Inference;
use crate::numeric::{argmax, log_softmax, softmax};

/// Arg-max at temperature 0, categorical sampling otherwise.
pub struct GreedyDecoder {
    temperature: f32,
    eot: u32,
    rng: StdRng,
}

impl GreedyDecoder {
    /// `seed` makes temperature sampling reproducible.
    pub fn new(temperature: f32, eot: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            temperature,
            eot,
            rng,
        }
    }

    fn sample(&mut self, logits: ArrayView1<'_, f32>) -> usize {
        let scaled = logits.mapv(|v| v / self.temperature);
        let probs = softmax(scaled.view());
        let draw: f32 = self.rng.random();
        let mut acc = 0.0;
        let mut last_valid = argmax(probs.view());
        for (i, &p) in probs.iter().enumerate() {
            if !(p > 0.0) {
                continue;
            }
            last_valid = i;
            acc += p;
            if draw < acc {
                return i;
            }
        }
        // Rounding left `acc` just under 1.
        last_valid
    }
}

impl TokenDecoder for GreedyDecoder {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn reset(&mut self) {}

    fn update(
        &mut self,
        mut tokens: TokenBatch,
        logits: &Array2<f32>,
        sum_logprobs: &mut Vec<f32>,
        _inference: &mut dyn Inference,
    ) -> Result<(TokenBatch, bool)> {
        let last = tokens.last_tokens();
        let mut next = Vec::with_capacity(tokens.n_rows());

        for (i, row) in logits.rows().into_iter().enumerate() {
            // Finished rows stay at eot and leave the RNG untouched.
            if last[i] == Some(self.eot) {
                next.push(self.eot);
                continue;
            }
            let chosen = if self.temperature == 0.0 {
                argmax(row)
            } else {
                self.sample(row)
            };
            let logprobs = log_softmax(row);
            sum_logprobs[i] += logprobs[chosen];
            next.push(chosen as u32);
        }

        tokens.push_column(&next);
        let completed = next.iter().all(|&t| t == self.eot);
        Ok((tokens, completed))
    }

    fn finalize(
        &mut self,
        groups: Vec<Vec<Vec<u32>>>,
        sum_logprobs: &[f32],
    ) -> Result<Vec<Candidates>> {
        let mut offset = 0;
        let candidates = groups
            .into_iter()
            .map(|group| {
                let n = group.len();
                let tokens = group
                    .into_iter()
                    .map(|mut seq| {
                        seq.push(self.eot);
                        seq
                    })
                    .collect();
                let scores = sum_logprobs[offset..offset + n].to_vec();
                offset += n;
                Candidates {
                    tokens,
                    sum_logprobs: scores,
                }
            })
            .collect();
        Ok(candidates)
    }
}
