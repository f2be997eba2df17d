//! Audio payload encoding for storage and API transport
//!
//! Audio arrives as raw bytes and has to cross two text-only boundaries:
//! the saved-session JSON on disk and the inline-data field of gateway
//! requests. Both use standard base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Decoded audio as held in memory: raw bytes plus their mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AudioPayload {
    pub(crate) bytes: Vec<u8>,
    pub(crate) mime_type: String,
}

impl AudioPayload {
    pub(crate) fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Mime type with codec parameters stripped, e.g.
    /// "audio/webm;codecs=opus" becomes "audio/webm".
    pub(crate) fn clean_mime_type(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or(&self.mime_type)
            .trim()
    }
}

/// Text-encoded audio as persisted in a session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EncodedAudio {
    pub(crate) data: String,
    pub(crate) mime_type: String,
}

/// Encode audio bytes for storage.
pub(crate) fn encode(audio: &AudioPayload) -> EncodedAudio {
    EncodedAudio {
        data: BASE64.encode(&audio.bytes),
        mime_type: audio.mime_type.clone(),
    }
}

/// Decode stored audio back into raw bytes.
///
/// The stored text is untrusted (it is read during startup recovery), so
/// malformed input surfaces as a recoverable error rather than a panic.
pub(crate) fn decode(encoded: &EncodedAudio) -> Result<AudioPayload, CodecError> {
    let bytes = BASE64.decode(&encoded.data)?;
    Ok(AudioPayload::new(bytes, encoded.mime_type.clone()))
}

/// Errors from decoding persisted audio
#[derive(Debug, thiserror::Error)]
pub(crate) enum CodecError {
    #[error("Invalid audio encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}
