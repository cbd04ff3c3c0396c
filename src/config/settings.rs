//! Decoder settings and TOML persistence.
//!
//! `settings.toml` carries one `[decoding]` table whose keys mirror
//! [`DecodingOptions`]; every key is optional.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::DecoderPaths;
use crate::task::DecodingOptions;

/// Top-level contents of `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Options handed to every decoding task.
    pub decoding: DecodingOptions,
}

impl DecoderConfig {
    /// Load from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(DecoderConfig::default())` when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&DecoderPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to the platform-appropriate `settings.toml`, creating parent
    /// directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&DecoderPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Decoding options with a relative `lm_path` resolved against
    /// `paths.lm_dir`.
    pub fn resolved_options(&self, paths: &DecoderPaths) -> DecodingOptions {
        let mut options = self.decoding.clone();
        if let Some(lm_path) = options.lm_path.take() {
            options.lm_path = Some(paths.resolve_lm(&lm_path));
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{OutOfCandidate, SuppressList, Task};
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut original = DecoderConfig::default();
        original.decoding.beam_size = Some(5);
        original.decoding.patience = Some(1.5);
        original.decoding.language = Some("fr".into());
        original.decoding.suppress_tokens = SuppressList::ids(vec![220, 50257]);
        original.decoding.hotwords = vec!["whisper".into()];
        original.save_to(&path).expect("save");

        let loaded = DecoderConfig::load_from(&path).expect("load");
        assert_eq!(original, loaded);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = DecoderConfig::load_from(&path).expect("should not error");
        assert_eq!(config, DecoderConfig::default());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[decoding]\n\
             task = \"transcribe\"\n\
             beam_size = 3\n\
             suppress_tokens = \"\"\n\
             out_of_candidate = \"acoustic\"\n",
        )
        .expect("write");

        let cfg = DecoderConfig::load_from(&path).expect("load");
        assert_eq!(cfg.decoding.task, Task::Transcribe);
        assert_eq!(cfg.decoding.beam_size, Some(3));
        assert!(cfg.decoding.suppress_tokens.is_empty());
        assert_eq!(cfg.decoding.out_of_candidate, OutOfCandidate::Acoustic);
        assert!(cfg.decoding.suppress_blank);
        assert_eq!(cfg.decoding.lm_alpha, 2.0);
        assert_eq!(cfg.decoding.max_initial_timestamp, Some(1.0));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[decoding]\nbeam_size = \"five\"\n").expect("write");
        assert!(DecoderConfig::load_from(&path).is_err());
    }

    #[test]
    fn relative_lm_path_resolves_into_lm_dir() {
        let dir = tempdir().expect("temp dir");
        let paths = DecoderPaths::rooted(dir.path().join("cfg"), dir.path().join("data"));
        let mut cfg = DecoderConfig::default();
        cfg.decoding.lm_path = Some("en-3gram.arpa".into());

        let options = cfg.resolved_options(&paths);
        assert_eq!(options.lm_path, Some(paths.lm_dir.join("en-3gram.arpa")));
        // The stored config is untouched.
        assert_eq!(cfg.decoding.lm_path, Some("en-3gram.arpa".into()));
    }
}
