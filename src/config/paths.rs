//! Cross-platform decoder paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\whisper-decoding\
//!   macOS:   ~/Library/Application Support/whisper-decoding/
//!   Linux:   ~/.config/whisper-decoding/
//!
//! Data dir (n-gram models):
//!   Windows: %LOCALAPPDATA%\whisper-decoding\lm\
//!   macOS:   ~/Library/Application Support/whisper-decoding/lm/
//!   Linux:   ~/.local/share/whisper-decoding/lm/

use std::path::{Path, PathBuf};

/// Resolved directory and file paths.
#[derive(Debug, Clone)]
pub struct DecoderPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory searched for relative ARPA model paths.
    pub lm_dir: PathBuf,
}

impl DecoderPaths {
    const APP_NAME: &'static str = "whisper-decoding";

    /// Resolve all paths, falling back to the current directory when the
    /// platform has no standard location.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self::rooted(config_dir, data_dir)
    }

    /// Paths under explicit config and data roots.
    pub fn rooted(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            settings_file: config_dir.join("settings.toml"),
            lm_dir: data_dir.join("lm"),
            config_dir,
        }
    }

    /// `path` itself when absolute, otherwise `lm_dir/path`.
    pub fn resolve_lm(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.lm_dir.join(path)
        }
    }
}

impl Default for DecoderPaths {
    fn default() -> Self {
        Self::new()
    }
}
