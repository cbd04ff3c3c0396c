//! Hotword boosting.
//!
//! Each hotword is encoded with a leading space.  When the last `k` sampled
//! tokens of a row equal the hotword's first `k` tokens, the hotword's next
//! token gets `weight * (k + 1) / len` added to its logit, so the bonus grows
//! as the match progresses.  Masked tokens stay masked.

use ndarray::Array2;

use super::LogitFilter;
use crate::batch::TokenBatch;
use crate::tokenizer::Tokenizer;

/// Additive logit bonus for configured hotwords.
pub struct BoostTokens {
    hotwords: Vec<Vec<u32>>,
    weight: f32,
    sample_begin: usize,
}

impl BoostTokens {
    /// Encode `words` with `tokenizer`; words that encode to nothing are
    /// dropped.  Returns `None` when no hotword survives.
    pub fn new(
        words: &[String],
        tokenizer: &dyn Tokenizer,
        weight: f32,
        sample_begin: usize,
    ) -> Option<Self> {
        let hotwords: Vec<Vec<u32>> = words
            .iter()
            .map(|w| tokenizer.encode(&format!(" {}", w.trim())))
            .filter(|t| !t.is_empty())
            .collect();
        if hotwords.is_empty() {
            return None;
        }
        Some(Self {
            hotwords,
            weight,
            sample_begin,
        })
    }
}

impl LogitFilter for BoostTokens {
    fn name(&self) -> &'static str {
        "boost_tokens"
    }

    fn apply(&self, logits: &mut Array2<f32>, tokens: &TokenBatch) {
        let n_vocab = logits.ncols();
        for (row, seq) in tokens.rows().enumerate() {
            let sampled = seq.get(self.sample_begin..).unwrap_or(&[]);
            for word in &self.hotwords {
                let len = word.len() as f32;
                for k in 0..word.len() {
                    if k > sampled.len() || sampled[sampled.len() - k..] != word[..k] {
                        continue;
                    }
                    let target = word[k] as usize;
                    if target < n_vocab {
                        logits[[row, target]] += self.weight * (k + 1) as f32 / len;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ToyTokenizer;

    const PREFIX: [u32; 1] = [12];

    #[test]
    fn bonus_grows_with_the_match() {
        let tok = ToyTokenizer::new();
        // " ab" encodes as [" ", "a", "b"] in the toy vocabulary.
        let word = tok.encode(" ab");
        assert_eq!(word.len(), 3);
        let f = BoostTokens::new(&["ab".into()], &tok, 3.0, PREFIX.len()).unwrap();

        let mut logits = Array2::zeros((1, tok.n_vocab()));
        f.apply(&mut logits, &TokenBatch::repeat(&[12, 4], 1));
        assert_eq!(logits[[0, word[0] as usize]], 1.0);
        assert_eq!(logits[[0, word[1] as usize]], 0.0);

        let mut logits = Array2::zeros((1, tok.n_vocab()));
        f.apply(&mut logits, &TokenBatch::repeat(&[12, word[0], word[1]], 1));
        assert_eq!(logits[[0, word[2] as usize]], 3.0);
    }

    #[test]
    fn masked_tokens_stay_masked() {
        let tok = ToyTokenizer::new();
        let f = BoostTokens::new(&["a".into()], &tok, 5.0, 1).unwrap();
        let first = tok.encode(" a")[0] as usize;
        let mut logits = Array2::zeros((1, tok.n_vocab()));
        logits[[0, first]] = f32::NEG_INFINITY;
        f.apply(&mut logits, &TokenBatch::repeat(&PREFIX, 1));
        assert_eq!(logits[[0, first]], f32::NEG_INFINITY);
    }

    #[test]
    fn unencodable_words_are_dropped() {
        let tok = ToyTokenizer::new();
        assert!(BoostTokens::new(&["zzz".into()], &tok, 5.0, 1).is_none());
    }
}
