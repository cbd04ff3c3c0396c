//! Autoregressive token search for Whisper-style speech models.
//!
//! # Pipeline
//!
//! ```text
//!  mel / audio features
//!         │
//!         ▼
//!  ┌──────────────┐   language detection (optional)
//!  │ DecodingTask │───────────────────────────────────┐
//!  └──────┬───────┘                                   │
//!         │ per step                                  │
//!         ▼                                           │
//!  Inference::logits ──► FilterPipeline ──► TokenDecoder::update
//!  (KvCache)              suppress/boost/      greedy | beam | beam + LM
//!                         timestamp rules             │
//!         ▲                                           │
//!         └──── rearrange_cache(source rows) ◄────────┘
//!                                                     │ finalize
//!                                                     ▼
//!                                    SequenceRanker ──► DecodingResult
//! ```
//!
//! The acoustic model and the tokenizer are external: implement
//! [`inference::WhisperModel`] and [`tokenizer::Tokenizer`] and hand them to
//! [`decode`] or [`decode_batch`].

pub mod batch;
pub mod config;
pub mod decoder;
pub mod error;
pub mod filters;
pub mod inference;
pub mod lm;
pub(crate) mod numeric;
pub mod ranker;
pub mod task;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use batch::TokenBatch;
pub use config::{DecoderConfig, DecoderPaths};
pub use error::{DecodeError, Result};
pub use inference::{KvCache, ModelDims, Precision, WhisperModel};
pub use task::{decode, decode_batch, DecodingOptions, DecodingResult, DecodingTask, Task};
pub use tokenizer::{SpecialTokens, Tokenizer};
