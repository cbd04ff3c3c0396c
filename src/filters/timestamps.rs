//! Timestamp pairing and ordering rules.
//!
//! Within the sampled region of each row:
//!
//! - `<|notimestamps|>` is never sampled;
//! - a timestamp that closes a segment (previous token was text) must be
//!   followed by another timestamp or end-of-text;
//! - after a timestamp pair only text may follow;
//! - timestamps never decrease, and a closing timestamp is strictly later
//!   than the one that opened the segment;
//! - the first sampled token is a timestamp, optionally no later than
//!   `max_initial_timestamp_index`;
//! - when the total timestamp probability beats every single text token, a
//!   timestamp is forced.

use ndarray::{s, Array2};

use super::{mask_range, LogitFilter};
use crate::batch::TokenBatch;
use crate::numeric::{log_softmax, logsumexp};
use crate::tokenizer::SpecialTokens;

/// The timestamp rule set.
pub struct ApplyTimestampRules {
    special: SpecialTokens,
    sample_begin: usize,
    max_initial_timestamp_index: Option<usize>,
}

impl ApplyTimestampRules {
    /// Build the rules for a task whose fixed prefix has `sample_begin`
    /// tokens.
    pub fn new(
        special: &SpecialTokens,
        sample_begin: usize,
        max_initial_timestamp_index: Option<usize>,
    ) -> Self {
        Self {
            special: special.clone(),
            sample_begin,
            max_initial_timestamp_index,
        }
    }
}

impl LogitFilter for ApplyTimestampRules {
    fn name(&self) -> &'static str {
        "timestamp_rules"
    }

    fn apply(&self, logits: &mut Array2<f32>, tokens: &TokenBatch) {
        let n_vocab = logits.ncols();
        let special = &self.special;
        let ts_begin = special.timestamp_begin as usize;

        if let Some(nt) = special.no_timestamps {
            super::mask_columns(logits, &[nt]);
        }

        for (k, row) in tokens.rows().enumerate() {
            let sampled = row.get(self.sample_begin..).unwrap_or(&[]);
            let last_was_timestamp = sampled.last().is_some_and(|&t| special.is_timestamp(t));
            let penultimate_was_timestamp =
                sampled.len() < 2 || special.is_timestamp(sampled[sampled.len() - 2]);

            if last_was_timestamp {
                if penultimate_was_timestamp {
                    mask_range(logits, k, ts_begin, n_vocab);
                } else {
                    mask_range(logits, k, 0, special.eot as usize);
                }
            }

            if let Some(&last_ts) = sampled.iter().rev().find(|&&t| special.is_timestamp(t)) {
                let bound = if last_was_timestamp && !penultimate_was_timestamp {
                    last_ts as usize
                } else {
                    last_ts as usize + 1
                };
                mask_range(logits, k, ts_begin, bound);
            }
        }

        if tokens.seq_len() == self.sample_begin {
            for k in 0..logits.nrows() {
                mask_range(logits, k, 0, ts_begin);
                if let Some(index) = self.max_initial_timestamp_index {
                    mask_range(logits, k, ts_begin + index + 1, n_vocab);
                }
            }
        }

        if ts_begin >= n_vocab {
            return;
        }
        for k in 0..logits.nrows() {
            let logprobs = log_softmax(logits.row(k));
            let timestamp_logprob = logsumexp(logprobs.slice(s![ts_begin..]));
            let max_text_logprob = logprobs
                .slice(s![..ts_begin])
                .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            if timestamp_logprob > max_text_logprob {
                mask_range(logits, k, 0, ts_begin);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterPipeline, SuppressTokens};
    use crate::numeric::argmax;
    use crate::testing::ToyTokenizer;
    use crate::tokenizer::Tokenizer;
    use proptest::prelude::*;

    const PREFIX: [u32; 3] = [12, 15, 17];

    fn rules(tok: &ToyTokenizer, max_initial: Option<usize>) -> ApplyTimestampRules {
        ApplyTimestampRules::new(tok.special_tokens(), PREFIX.len(), max_initial)
    }

    fn apply_once(f: &ApplyTimestampRules, sampled: &[u32], logits: &mut Array2<f32>) {
        let mut row = PREFIX.to_vec();
        row.extend_from_slice(sampled);
        f.apply(logits, &TokenBatch::repeat(&row, 1));
    }

    #[test]
    fn first_position_allows_only_early_timestamps() {
        let tok = ToyTokenizer::new();
        let ts = tok.special_tokens().timestamp_begin as usize;
        let f = rules(&tok, Some(2));
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        apply_once(&f, &[], &mut logits);
        for id in 0..tok.n_vocab() {
            let allowed = (ts..=ts + 2).contains(&id);
            assert_eq!(logits[[0, id]].is_finite(), allowed, "token {id}");
        }
    }

    #[test]
    fn closing_timestamp_forbids_text() {
        let tok = ToyTokenizer::new();
        let ts = tok.special_tokens().timestamp_begin;
        let f = rules(&tok, None);
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        logits[[0, tok.special_tokens().eot as usize]] = 5.0;
        apply_once(&f, &[ts, 1, ts + 3], &mut logits);
        assert!(logits[[0, 1]].is_infinite());
        assert!(logits[[0, tok.special_tokens().eot as usize]].is_finite());
        // The closing timestamp itself may repeat to open the next segment.
        assert!(logits[[0, (ts + 3) as usize]].is_finite());
        assert!(logits[[0, (ts + 2) as usize]].is_infinite());
    }

    #[test]
    fn timestamp_pair_forbids_timestamps() {
        let tok = ToyTokenizer::new();
        let ts = tok.special_tokens().timestamp_begin;
        let f = rules(&tok, None);
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        apply_once(&f, &[ts, 1, ts + 3, ts + 3], &mut logits);
        assert!(logits.slice(s![0, ts as usize..]).iter().all(|v| v.is_infinite()));
        assert!(logits[[0, 1]].is_finite());
    }

    #[test]
    fn open_segment_needs_strictly_later_timestamp() {
        let tok = ToyTokenizer::new();
        let ts = tok.special_tokens().timestamp_begin;
        let f = rules(&tok, None);
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        apply_once(&f, &[ts + 2, 1], &mut logits);
        assert!(logits[[0, (ts + 2) as usize]].is_infinite());
        assert!(logits[[0, (ts + 3) as usize]].is_finite());
    }

    #[test]
    fn dominant_timestamp_mass_forces_timestamp() {
        let tok = ToyTokenizer::new();
        let ts = tok.special_tokens().timestamp_begin as usize;
        let f = rules(&tok, None);
        let mut logits = Array2::from_elem((1, tok.n_vocab()), -10.0);
        logits[[0, 1]] = 1.0;
        for id in ts..tok.n_vocab() {
            logits[[0, id]] = 0.5;
        }
        apply_once(&f, &[ts as u32, 1], &mut logits);
        assert!(logits[[0, 1]].is_infinite());
    }

    #[test]
    fn no_timestamps_token_is_always_masked() {
        let tok = ToyTokenizer::new();
        let nt = tok.special_tokens().no_timestamps.unwrap() as usize;
        let f = rules(&tok, None);
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        apply_once(&f, &[21, 1], &mut logits);
        assert!(logits[[0, nt]].is_infinite());
    }

    proptest! {
        #[test]
        fn greedy_output_obeys_pairing_and_ordering(
            steps in prop::collection::vec(prop::collection::vec(-5.0f32..5.0, 31), 1..14)
        ) {
            let tok = ToyTokenizer::new();
            let sp = tok.special_tokens().clone();
            let mut pipeline = FilterPipeline::new();
            pipeline.push(SuppressTokens::new((sp.eot + 1..sp.timestamp_begin).collect()));
            pipeline.push(rules(&tok, None));

            let mut batch = TokenBatch::repeat(&PREFIX, 1);
            for step in &steps {
                let mut logits = Array2::from_shape_vec((1, 31), step.clone()).unwrap();
                pipeline.apply(&mut logits, &batch);
                let next = argmax(logits.row(0)) as u32;
                batch.push_column(&[next]);
                if next == sp.eot {
                    break;
                }
            }

            let sampled = &batch.row(0)[PREFIX.len()..];
            let body: Vec<u32> = sampled.iter().copied().take_while(|&t| t != sp.eot).collect();
            let is_ts = |t: u32| t >= sp.timestamp_begin;

            prop_assert!(body.first().is_some_and(|&t| is_ts(t)));
            for w in body.windows(3) {
                prop_assert!(!(is_ts(w[0]) && is_ts(w[1]) && is_ts(w[2])));
            }
            for (i, w) in body.windows(2).enumerate() {
                // A timestamp closing a text segment is followed by a timestamp.
                let closes = i > 0 && !is_ts(body[i - 1]) && is_ts(w[0]);
                if closes {
                    prop_assert!(is_ts(w[1]));
                }
            }
            let stamps: Vec<u32> = body.iter().copied().filter(|&t| is_ts(t)).collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
