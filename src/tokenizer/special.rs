//! Special-token ids and the start-of-transcript sequence.
//!
//! [`SpecialTokens`] can be built by hand (tests, custom vocabularies) or
//! parsed from an `added_tokens.json`-style table with
//! [`SpecialTokens::from_added_tokens_json`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::task::Task;

/// A language token: ISO code plus token id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageToken {
    /// Language code, e.g. `"en"`.
    pub code: String,
    /// Token id of `<|code|>`.
    pub id: u32,
}

// ---------------------------------------------------------------------------
// SpecialTokens
// ---------------------------------------------------------------------------

/// Ids of every structural token the search needs.
///
/// Text tokens are all ids below `eot`; timestamp tokens are all ids at or
/// above `timestamp_begin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialTokens {
    /// `<|endoftext|>`
    pub eot: u32,
    /// `<|startoftranscript|>`
    pub sot: u32,
    /// `<|startofprev|>`
    pub sot_prev: u32,
    /// `<|startoflm|>`
    pub sot_lm: u32,
    /// `<|transcribe|>`
    pub transcribe: u32,
    /// `<|translate|>`
    pub translate: u32,
    /// `<|notimestamps|>`, when the vocabulary has one.
    pub no_timestamps: Option<u32>,
    /// `<|nospeech|>` (or `<|nocaptions|>` in older vocabularies).
    pub no_speech: Option<u32>,
    /// `<|0.00|>`, the first timestamp token.
    pub timestamp_begin: u32,
    /// Language tokens in vocabulary order; empty for English-only models.
    pub languages: Vec<LanguageToken>,
}

const STRUCTURAL: &[&str] = &[
    "endoftext",
    "startoftranscript",
    "startofprev",
    "startoflm",
    "transcribe",
    "translate",
    "notimestamps",
    "nospeech",
    "nocaptions",
];

impl SpecialTokens {
    /// Parse a `{"<|token|>": id, ...}` table.
    ///
    /// Language tokens are recognised as `<|xx|>` / `<|xxx|>` entries made of
    /// lowercase ASCII letters that are not structural tokens.
    pub fn from_added_tokens_json(json: &str) -> Result<Self> {
        let table: HashMap<String, u32> = serde_json::from_str(json)
            .map_err(|e| DecodeError::Model(format!("special token table: {e}")))?;

        let lookup = |name: &str| table.get(&format!("<|{name}|>")).copied();
        let require = |name: &str| {
            lookup(name).ok_or_else(|| {
                DecodeError::Model(format!("special token table is missing <|{name}|>"))
            })
        };

        let mut languages: Vec<LanguageToken> = table
            .iter()
            .filter_map(|(text, &id)| {
                let inner = text.strip_prefix("<|")?.strip_suffix("|>")?;
                let is_code = (2..=3).contains(&inner.len())
                    && inner.chars().all(|c| c.is_ascii_lowercase())
                    && !STRUCTURAL.contains(&inner);
                is_code.then(|| LanguageToken {
                    code: inner.to_string(),
                    id,
                })
            })
            .collect();
        languages.sort_by_key(|l| l.id);

        Ok(Self {
            eot: require("endoftext")?,
            sot: require("startoftranscript")?,
            sot_prev: require("startofprev")?,
            sot_lm: require("startoflm")?,
            transcribe: require("transcribe")?,
            translate: require("translate")?,
            no_timestamps: lookup("notimestamps"),
            no_speech: lookup("nospeech").or_else(|| lookup("nocaptions")),
            timestamp_begin: require("0.00")?,
            languages,
        })
    }

    /// `true` when the vocabulary carries language tokens.
    pub fn is_multilingual(&self) -> bool {
        !self.languages.is_empty()
    }

    /// Token id for a language code.
    pub fn language_token(&self, code: &str) -> Option<u32> {
        self.languages.iter().find(|l| l.code == code).map(|l| l.id)
    }

    /// Language code for a token id.
    pub fn language_code(&self, id: u32) -> Option<&str> {
        self.languages
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.code.as_str())
    }

    /// `true` for timestamp tokens.
    pub fn is_timestamp(&self, token: u32) -> bool {
        token >= self.timestamp_begin
    }

    /// The start-of-transcript sequence.
    ///
    /// Multilingual: `[sot, <|language|>, <|task|>]`, English-only: `[sot]`.
    /// An unknown language code is an error.
    pub fn sot_sequence(&self, language: &str, task: Task) -> Result<Vec<u32>> {
        let mut seq = vec![self.sot];
        if self.is_multilingual() {
            let lang = self.language_token(language).ok_or_else(|| {
                DecodeError::InvalidOptions(format!("unsupported language: {language}"))
            })?;
            seq.push(lang);
            seq.push(match task {
                Task::Translate => self.translate,
                Task::Transcribe | Task::LanguageId => self.transcribe,
            });
        }
        Ok(seq)
    }

    /// [`sot_sequence`](Self::sot_sequence) followed by `<|notimestamps|>`.
    pub fn sot_sequence_including_notimestamps(
        &self,
        language: &str,
        task: Task,
    ) -> Result<Vec<u32>> {
        let mut seq = self.sot_sequence(language, task)?;
        if let Some(nt) = self.no_timestamps {
            seq.push(nt);
        }
        Ok(seq)
    }
}
