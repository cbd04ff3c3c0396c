//! Decoding options, defaults and validation.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through the `[decoding]` table of a TOML
//! settings file.  Missing fields take their defaults.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// What the decoder is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// X → X transcription.
    Transcribe,
    /// X → English translation.
    #[default]
    Translate,
    /// Language identification only; no tokens are sampled.
    #[serde(rename = "lang_id")]
    LanguageId,
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Prompt or prefix given either as text or as pre-encoded token ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    /// Text; encoded with a leading space after trimming.
    Text(String),
    /// Token ids used verbatim.
    Tokens(Vec<u32>),
}

// ---------------------------------------------------------------------------
// SuppressList
// ---------------------------------------------------------------------------

/// Token ids to suppress at every step.
///
/// String form: comma-separated ids, where `-1` stands for the tokenizer's
/// non-speech set.  The empty string disables the suppression filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SuppressList {
    /// Include [`Tokenizer::non_speech_tokens`](crate::tokenizer::Tokenizer::non_speech_tokens).
    pub non_speech: bool,
    /// Explicit ids.
    pub ids: Vec<u32>,
}

impl SuppressList {
    /// No suppression at all.
    pub fn none() -> Self {
        Self {
            non_speech: false,
            ids: Vec::new(),
        }
    }

    /// Explicit ids only.
    pub fn ids(ids: impl Into<Vec<u32>>) -> Self {
        Self {
            non_speech: false,
            ids: ids.into(),
        }
    }

    /// `true` when the list suppresses nothing, which also drops the
    /// structural tokens that a non-empty list would add.
    pub fn is_empty(&self) -> bool {
        !self.non_speech && self.ids.is_empty()
    }
}

impl Default for SuppressList {
    fn default() -> Self {
        Self {
            non_speech: true,
            ids: Vec::new(),
        }
    }
}

impl TryFrom<String> for SuppressList {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::str::FromStr for SuppressList {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut list = Self::none();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let id: i64 = item
                .parse()
                .map_err(|_| format!("suppress_tokens: '{item}' is not a token id"))?;
            match id {
                -1 => list.non_speech = true,
                id if id >= 0 => {
                    list.ids.push(
                        u32::try_from(id)
                            .map_err(|_| format!("suppress_tokens: {id} is out of range"))?,
                    );
                }
                // Other negative ids carry no meaning and are ignored.
                _ => {}
            }
        }
        Ok(list)
    }
}

impl fmt::Display for SuppressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.non_speech {
            parts.push("-1".into());
        }
        parts.extend(self.ids.iter().map(u32::to_string));
        f.write_str(&parts.join(","))
    }
}

impl From<SuppressList> for String {
    fn from(list: SuppressList) -> Self {
        list.to_string()
    }
}

// ---------------------------------------------------------------------------
// OutOfCandidate
// ---------------------------------------------------------------------------

/// What happens to tokens outside the acoustic candidate subset when LM
/// fusion is limited with `select_candidates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfCandidate {
    /// Masked to `-inf`; they can never be selected.
    #[default]
    Exclude,
    /// Kept with their plain acoustic score.
    Acoustic,
}

// ---------------------------------------------------------------------------
// DecodingOptions
// ---------------------------------------------------------------------------

/// Options for one decoding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingOptions {
    /// Transcribe, translate or identify the language.
    pub task: Task,
    /// Spoken language code; detected from the audio when `None`.
    pub language: Option<String>,

    /// Sampling temperature; 0 selects the arg-max token.
    pub temperature: f32,
    /// Maximum number of tokens to sample; half the text context when `None`.
    pub sample_len: Option<usize>,
    /// Independent samples per audio (requires `temperature > 0`).
    pub best_of: Option<usize>,
    /// Beam width; enables beam search.
    pub beam_size: Option<usize>,
    /// Beam patience; `max_candidates = round(beam_size * patience)`.
    pub patience: Option<f32>,

    /// Google-NMT length penalty alpha in `[0, 1]`; plain length
    /// normalisation when `None`.
    pub length_penalty: Option<f32>,

    /// Previous-context prompt.
    pub prompt: Option<Prompt>,
    /// Forced prefix of the current context.
    pub prefix: Option<Prompt>,
    /// Suppress blank output at the first sampled position.
    pub suppress_blank: bool,
    /// Tokens to suppress at every step.
    pub suppress_tokens: SuppressList,

    /// Sample text tokens only.
    pub without_timestamps: bool,
    /// Latest allowed first timestamp in seconds; `None` or `0` disables
    /// the bound.
    pub max_initial_timestamp: Option<f32>,

    /// Request half precision from the encoder.
    pub fp16: bool,

    /// Fuse an n-gram language model into beam search.
    pub with_lm: bool,
    /// ARPA model file; relative paths resolve against the LM directory.
    pub lm_path: Option<PathBuf>,
    /// LM weight.
    pub lm_alpha: f32,
    /// Per-token insertion bonus.
    pub lm_beta: f32,
    /// Limit LM fusion to the top-N acoustic candidates per row.
    pub select_candidates: Option<usize>,
    /// Treatment of tokens outside the candidate subset.
    pub out_of_candidate: OutOfCandidate,

    /// Words whose token sequences get a logit bonus.
    pub hotwords: Vec<String>,
    /// Bonus of a fully matched hotword token.
    pub hotword_weight: f32,

    /// Seed for temperature sampling.
    pub seed: Option<u64>,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            task: Task::default(),
            language: None,
            temperature: 0.0,
            sample_len: None,
            best_of: None,
            beam_size: None,
            patience: None,
            length_penalty: None,
            prompt: None,
            prefix: None,
            suppress_blank: true,
            suppress_tokens: SuppressList::default(),
            without_timestamps: false,
            max_initial_timestamp: Some(1.0),
            fp16: true,
            with_lm: false,
            lm_path: None,
            lm_alpha: 2.0,
            lm_beta: 2.5,
            select_candidates: None,
            out_of_candidate: OutOfCandidate::default(),
            hotwords: Vec::new(),
            hotword_weight: 5.0,
            seed: None,
        }
    }
}

impl DecodingOptions {
    /// Reject incompatible combinations before any model call.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(DecodeError::InvalidOptions(msg.to_string()));

        if self.beam_size.is_some() && self.best_of.is_some() {
            return invalid("beam_size and best_of can't be given together");
        }
        if self.temperature == 0.0 && self.best_of.is_some() {
            return invalid("best_of with greedy sampling (T=0) is not compatible");
        }
        if self.temperature < 0.0 || !self.temperature.is_finite() {
            return invalid("temperature must be a finite, non-negative number");
        }
        if self.patience.is_some() && self.beam_size.is_none() {
            return invalid("patience requires beam_size to be given");
        }
        if let Some(alpha) = self.length_penalty {
            if !(0.0..=1.0).contains(&alpha) {
                return invalid("length_penalty (alpha) should be a value between 0 and 1");
            }
        }
        if self.beam_size == Some(0) || self.best_of == Some(0) {
            return invalid("beam_size and best_of must be at least 1");
        }
        if self.with_lm {
            if self.beam_size.is_none() {
                return invalid("with_lm requires beam_size to be given");
            }
            if self.lm_path.is_none() {
                return invalid("with_lm requires lm_path to be given");
            }
        }
        if self.select_candidates == Some(0) {
            return invalid("select_candidates must be at least 1");
        }
        Ok(())
    }

    /// Rows per audio: beam width, best-of count, or 1.
    pub fn n_group(&self) -> usize {
        self.beam_size.or(self.best_of).unwrap_or(1)
    }

    /// The initial-timestamp bound, treating `0` as disabled.
    pub fn initial_timestamp_bound(&self) -> Option<f32> {
        self.max_initial_timestamp.filter(|&t| t > 0.0)
    }
}
