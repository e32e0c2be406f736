//! Audio file resolution and loading (spec §3 "Audio file reference":
//! opaque id → resolved local path, no runtime transcoding).
//!
//! Every audio asset is expected to already be 8 kHz mono 16-bit signed
//! PCM, little-endian, with no container — exactly what
//! [`dialer_media_core::codec::Variant::encode`] consumes. Getting a
//! greeting or IVR prompt into that format is an offline, out-of-band
//! step; this engine only ever reads it back.

use crate::error::{EngineError, Result};
use crate::ivr::AudioResolver;
use std::path::{Path, PathBuf};

/// Resolves an audio id to `<base_dir>/<id>.pcm`.
pub struct FileAudioResolver {
    base_dir: PathBuf,
}

impl FileAudioResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl AudioResolver for FileAudioResolver {
    fn resolve(&self, audio_file_id: &str) -> String {
        self.base_dir
            .join(format!("{audio_file_id}.pcm"))
            .to_string_lossy()
            .into_owned()
    }
}

/// Read a raw 16-bit signed PCM, little-endian file into samples.
pub fn load_pcm(path: impl AsRef<Path>) -> Result<Vec<i16>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::MediaHandler(format!("reading {}: {e}", path.display())))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}
