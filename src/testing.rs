//! Test doubles: a toy tokenizer and a scripted model.
//!
//! `ScriptedModel` keeps every row's token history *inside* the key/value
//! cache (layer 0 key projection, one token id per position).  Its logits
//! are a function of that cached history, so a cache that falls out of step
//! with the hypothesis batch changes what the model predicts.

use std::cell::Cell;

use ndarray::{s, Array3, ArrayView1, Axis};

use crate::error::{DecodeError, Result};
use crate::inference::{CacheKey, KvCache, ModelDims, Precision, WhisperModel};
use crate::tokenizer::{LanguageToken, SpecialTokens, Tokenizer};

/// Vocabulary size of the toy model.
pub(crate) const N_VOCAB: usize = 31;

/// Text pieces of the toy vocabulary, indexed by token id.
const PIECES: [&str; 11] = [" ", "a", "b", "c", "d", "e", "#", "♪", " ♪", " -", " '"];

// ---------------------------------------------------------------------------
// ToyTokenizer
// ---------------------------------------------------------------------------

/// Eleven text tokens, nine specials, ten timestamps.
///
/// | ids     | meaning                                     |
/// |---------|---------------------------------------------|
/// | 0..=10  | text pieces                                 |
/// | 11      | eot                                         |
/// | 12..=14 | sot, sot_prev, sot_lm                       |
/// | 15, 16  | `<|en|>`, `<|fr|>`                          |
/// | 17, 18  | transcribe, translate                       |
/// | 19, 20  | no_speech, no_timestamps                    |
/// | 21..=30 | timestamps                                  |
pub(crate) struct ToyTokenizer {
    special: SpecialTokens,
}

impl ToyTokenizer {
    pub(crate) fn new() -> Self {
        Self {
            special: SpecialTokens {
                eot: 11,
                sot: 12,
                sot_prev: 13,
                sot_lm: 14,
                transcribe: 17,
                translate: 18,
                no_timestamps: Some(20),
                no_speech: Some(19),
                timestamp_begin: 21,
                languages: vec![
                    LanguageToken {
                        code: "en".into(),
                        id: 15,
                    },
                    LanguageToken {
                        code: "fr".into(),
                        id: 16,
                    },
                ],
            },
        }
    }

    /// English-only variant without language tokens.
    pub(crate) fn english_only() -> Self {
        let mut tok = Self::new();
        tok.special.languages.clear();
        tok
    }

    /// Id of a text piece.  Panics for unknown pieces.
    pub(crate) fn id_of(&self, piece: &str) -> u32 {
        PIECES
            .iter()
            .position(|&p| p == piece)
            .unwrap_or_else(|| panic!("no toy piece {piece:?}")) as u32
    }

    pub(crate) fn n_vocab(&self) -> usize {
        N_VOCAB
    }
}

impl Tokenizer for ToyTokenizer {
    /// Greedy longest match; any unknown character yields no tokens at all.
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut out = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let best = PIECES
                .iter()
                .enumerate()
                .filter(|(_, p)| rest.starts_with(*p))
                .max_by_key(|(_, p)| p.len());
            match best {
                Some((id, piece)) => {
                    out.push(id as u32);
                    rest = &rest[piece.len()..];
                }
                None => return Vec::new(),
            }
        }
        out
    }

    fn decode(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .filter_map(|&t| PIECES.get(t as usize))
            .copied()
            .collect()
    }

    fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(usize, &[u32]) -> Vec<f32>>;

/// A model whose next-token logits come from `script(audio_index, history)`.
///
/// `audio_index` is read back from the audio features, which carry
/// `mel[a, 0, 0]` at position `[a, 0, 0]`.
pub(crate) struct ScriptedModel {
    dims: ModelDims,
    script: Script,
    calls: Cell<usize>,
    fail_on_call: Option<usize>,
}

impl ScriptedModel {
    pub(crate) fn new(script: impl Fn(usize, &[u32]) -> Vec<f32> + 'static) -> Self {
        Self {
            dims: ModelDims {
                n_audio_ctx: 1500,
                n_audio_state: 4,
                n_text_ctx: 24,
                n_vocab: N_VOCAB,
            },
            script: Box::new(script),
            calls: Cell::new(0),
            fail_on_call: None,
        }
    }

    /// Make the `n`-th forward pass (1-based) fail.
    pub(crate) fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub(crate) fn with_text_ctx(mut self, n_text_ctx: usize) -> Self {
        self.dims.n_text_ctx = n_text_ctx;
        self
    }

    /// Forward passes so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl WhisperModel for ScriptedModel {
    fn dims(&self) -> ModelDims {
        self.dims
    }

    fn encode_audio(&self, mel: &Array3<f32>, _precision: Precision) -> Result<Array3<f32>> {
        let n_audio = mel.len_of(Axis(0));
        let mut features = Array3::zeros((n_audio, self.dims.n_audio_ctx, self.dims.n_audio_state));
        for a in 0..n_audio {
            features[[a, 0, 0]] = mel[[a, 0, 0]];
        }
        Ok(features)
    }

    fn forward(
        &self,
        tokens: &ndarray::Array2<u32>,
        audio_features: &Array3<f32>,
        cache: &mut KvCache,
    ) -> Result<Array3<f32>> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if self.fail_on_call == Some(call) {
            return Err(DecodeError::Model(format!("scripted failure on call {call}")));
        }

        let (rows, cols) = tokens.dim();
        if audio_features.len_of(Axis(0)) != rows {
            return Err(DecodeError::Model(format!(
                "{} feature rows for {rows} token rows",
                audio_features.len_of(Axis(0))
            )));
        }
        let marks = Array3::from_shape_fn((rows, cols, 1), |(r, c, _)| tokens[[r, c]] as f32);
        cache.append(CacheKey::key(0), marks)?;
        let history = cache
            .get(&CacheKey::key(0))
            .ok_or_else(|| DecodeError::Model("history missing from cache".into()))?;
        let total = history.len_of(Axis(1));

        let mut out = Array3::zeros((rows, cols, self.dims.n_vocab));
        for r in 0..rows {
            let hist: Vec<u32> = history.slice(s![r, .., 0]).iter().map(|&v| v as u32).collect();
            let audio = audio_features[[r, 0, 0]] as usize;
            for j in 0..cols {
                let upto = total - cols + j + 1;
                let logits = (self.script)(audio, &hist[..upto]);
                out.slice_mut(s![r, j, ..]).assign(&ArrayView1::from(&logits[..]));
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Script helpers
// ---------------------------------------------------------------------------

/// Logits with `token` far ahead of a flat background.
pub(crate) fn peaked(token: u32) -> Vec<f32> {
    weighted(&[(token, 10.0)])
}

/// Flat background with the given `(token, logit)` overrides.
pub(crate) fn weighted(entries: &[(u32, f32)]) -> Vec<f32> {
    let mut v = vec![0.0; N_VOCAB];
    for &(t, w) in entries {
        v[t as usize] = w;
    }
    v
}

/// Route `log` output through the test harness; `RUST_LOG=debug` shows it.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mel batch whose audio `a` is tagged with index `a`.
pub(crate) fn tagged_mel(n_audio: usize) -> Array3<f32> {
    Array3::from_shape_fn((n_audio, 2, 3), |(a, _, _)| a as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toy_encoding_is_greedy_and_strict() {
        let tok = ToyTokenizer::new();
        assert_eq!(tok.encode(" ♪a"), vec![8, 1]);
        assert_eq!(tok.encode("az"), Vec::<u32>::new());
        assert_eq!(tok.decode(&[1, 2, 11, 21]), "ab");
    }

    #[test]
    fn toy_non_speech_set() {
        let tok = ToyTokenizer::new();
        assert_eq!(tok.non_speech_tokens(), vec![6, 7, 8, 9, 10]);
    }
}
