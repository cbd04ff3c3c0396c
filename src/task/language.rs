//! Language identification from the first decoder step.
//!
//! One forward pass of `<|startoftranscript|>` per audio against a
//! throw-away cache, so the sampling loop's cache never sees it.  Every
//! non-language token is masked before the arg-max.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{DecodeError, Result};
use crate::inference::{KvCache, WhisperModel};
use crate::numeric::{argmax, softmax};
use crate::tokenizer::Tokenizer;

/// Per-audio detection outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageDetection {
    /// Most likely language token per audio.
    pub tokens: Vec<u32>,
    /// Code of that token per audio.
    pub codes: Vec<String>,
    /// `{code -> probability}` over all language tokens, per audio.
    pub probs: Vec<BTreeMap<String, f32>>,
}

/// Detect the spoken language of each audio in `audio_features`.
pub fn detect_language(
    model: &dyn WhisperModel,
    tokenizer: &dyn Tokenizer,
    audio_features: &Array3<f32>,
) -> Result<LanguageDetection> {
    let special = tokenizer.special_tokens();
    if !special.is_multilingual() {
        return Err(DecodeError::NoLanguageTokens);
    }

    let n_audio = audio_features.len_of(Axis(0));
    let sot = Array2::from_elem((n_audio, 1), special.sot);
    let mut scratch = KvCache::new();
    let logits = model.forward(&sot, audio_features, &mut scratch)?;
    if logits.len_of(Axis(0)) != n_audio || logits.len_of(Axis(1)) == 0 {
        return Err(DecodeError::Model(format!(
            "language detection expected {n_audio} rows, got shape {:?}",
            logits.shape()
        )));
    }
    let n_vocab = logits.len_of(Axis(2));

    let mut detection = LanguageDetection {
        tokens: Vec::with_capacity(n_audio),
        codes: Vec::with_capacity(n_audio),
        probs: Vec::with_capacity(n_audio),
    };
    for row in logits.index_axis(Axis(1), 0).rows() {
        let mut masked = Array1::from_elem(n_vocab, f32::NEG_INFINITY);
        for lang in &special.languages {
            if let Some(&v) = row.get(lang.id as usize) {
                masked[lang.id as usize] = v;
            }
        }
        let best = argmax(masked.view()) as u32;
        let probs = softmax(masked.view());
        let code = special.language_code(best).ok_or_else(|| {
            DecodeError::Model(format!("language token {best} is outside the vocabulary"))
        })?;

        detection.tokens.push(best);
        detection.codes.push(code.to_string());
        detection.probs.push(
            special
                .languages
                .iter()
                .map(|l| (l.code.clone(), probs.get(l.id as usize).copied().unwrap_or(0.0)))
                .collect(),
        );
    }

    log::debug!("task: detected languages {:?}", detection.codes);
    Ok(detection)
}
