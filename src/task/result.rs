//! Per-audio decoding result.

use std::collections::BTreeMap;

use ndarray::Array2;

/// Outcome of decoding one audio segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingResult {
    /// Encoder output `(n_audio_ctx, n_audio_state)`.
    pub audio_features: Array2<f32>,
    /// Language code, pinned or detected.
    pub language: String,
    /// Detected language distribution, when detection ran.
    pub language_probs: Option<BTreeMap<String, f32>>,
    /// Sampled tokens between the fixed prefix and end-of-text.
    pub tokens: Vec<u32>,
    /// Decoded, trimmed text.
    pub text: String,
    /// `sum_logprob / (len(tokens) + 1)`.
    pub avg_logprob: f32,
    /// Probability of the no-speech token at the first step.
    pub no_speech_prob: f32,
    /// Sampling temperature used.
    pub temperature: f32,
    /// UTF-8 length over zlib-compressed length of `text`.
    pub compression_ratio: f32,
}

impl DecodingResult {
    /// Result of a language-identification-only run; score fields are NaN.
    pub fn language_only(
        audio_features: Array2<f32>,
        language: String,
        language_probs: Option<BTreeMap<String, f32>>,
    ) -> Self {
        Self {
            audio_features,
            language,
            language_probs,
            tokens: Vec::new(),
            text: String::new(),
            avg_logprob: f32::NAN,
            no_speech_prob: f32::NAN,
            temperature: f32::NAN,
            compression_ratio: f32::NAN,
        }
    }
}
