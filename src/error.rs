//! Crate-wide error type.
//!
//! Every fallible decoding operation returns [`DecodeError`].  Option
//! validation errors are raised before any model call; structural errors
//! (batch shape, beam bookkeeping) indicate a programming error in the
//! caller or in an external collaborator and are never retried.

use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// All errors that can arise while decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// [`DecodingOptions`](crate::task::DecodingOptions) failed validation.
    #[error("invalid decoding options: {0}")]
    InvalidOptions(String),

    /// Language identification was requested but the tokenizer/model has no
    /// language tokens.
    #[error("this model doesn't have language tokens so it can't perform lang id")]
    NoLanguageTokens,

    /// The hypothesis batch does not split evenly into beam groups.
    #[error("hypothesis batch of {rows} rows is not a multiple of beam size {beam_size}")]
    BatchNotDivisible {
        /// Number of rows in the hypothesis batch.
        rows: usize,
        /// Configured beam width.
        beam_size: usize,
    },

    /// `round(beam_size * patience)` is not positive.
    #[error("invalid beam size ({beam_size}) or patience ({patience})")]
    InvalidBeam {
        /// Configured beam width.
        beam_size: usize,
        /// Configured patience multiplier.
        patience: f32,
    },

    /// Result fields ended up with different per-audio lengths.
    #[error("inconsistent result lengths: {0:?}")]
    InconsistentResult(Vec<usize>),

    /// Token rows of a batch do not have the same length.
    #[error("ragged token batch: row {row} has {found} tokens, expected {expected}")]
    RaggedBatch {
        /// Offending row index.
        row: usize,
        /// Length of the offending row.
        found: usize,
        /// Length of the first row.
        expected: usize,
    },

    /// The external acoustic model failed or returned malformed output.
    #[error("model error: {0}")]
    Model(String),

    /// The n-gram language model could not be loaded or queried.
    #[error("language model error: {0}")]
    LanguageModel(String),

    /// Tensor reshaping / concatenation failed.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// I/O error (language-model file, compression buffer).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_mentions_both_numbers() {
        let e = DecodeError::BatchNotDivisible {
            rows: 5,
            beam_size: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains('5') && msg.contains('2'), "{msg}");
    }

    #[test]
    fn invalid_options_display() {
        let e = DecodeError::InvalidOptions("patience requires beam_size to be given".into());
        assert!(e.to_string().contains("patience"));
    }
}
