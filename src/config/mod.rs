//! Configuration module.
//!
//! Provides `DecoderConfig` (the `[decoding]` table of `settings.toml`),
//! `DecoderPaths` for cross-platform directories, and TOML persistence via
//! `DecoderConfig::load` / `DecoderConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::DecoderPaths;
pub use settings::DecoderConfig;
