//! External n-gram language model used for shallow fusion.
//!
//! Tokens are presented to the model as one "word" each: text token `t`
//! becomes the single character `char(t + 100)`, so an n-gram model trained
//! on token-id text can score Whisper token sequences directly.  The end of
//! a sequence is the model's `</s>`.
//!
//! Scores are log10 probabilities, the unit n-gram toolkits emit.

pub mod arpa;

pub use arpa::ArpaModel;

/// Sentence-start word.
pub const BEGIN_OF_SENTENCE: &str = "<s>";

/// Sentence-end word.
pub const END_OF_SENTENCE: &str = "</s>";

/// Unknown-word entry.
pub const UNKNOWN_WORD: &str = "<unk>";

/// Offset added to a token id to obtain its word character.
const TOKEN_CHAR_OFFSET: u32 = 100;

// ---------------------------------------------------------------------------
// NgramScorer trait
// ---------------------------------------------------------------------------

/// A scorer over an opaque, immutable context state.
pub trait NgramScorer {
    /// Context carried between calls.
    type State: Clone;

    /// State at the beginning of a sentence.
    fn begin_state(&self) -> Self::State;

    /// log10 probability of `word` after `state`, plus the advanced state.
    fn score(&self, state: &Self::State, word: &str) -> (f32, Self::State);
}

/// The word standing for text token `token`.
pub fn token_word(token: u32) -> Option<String> {
    token
        .checked_add(TOKEN_CHAR_OFFSET)
        .and_then(char::from_u32)
        .map(String::from)
}
