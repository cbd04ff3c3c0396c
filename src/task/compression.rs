//! Text compression ratio, a repetition diagnostic.
//!
//! Highly repetitive output (a model stuck in a loop) compresses well, so a
//! large ratio flags a suspicious transcript.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::Result;

/// `len(utf8) / len(zlib(utf8))` at the default compression level.
pub fn compression_ratio(text: &str) -> Result<f32> {
    let bytes = text.as_bytes();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    let compressed = encoder.finish()?;
    Ok(bytes.len() as f32 / compressed.len() as f32)
}
