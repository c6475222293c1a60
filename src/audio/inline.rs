//! Base64 `inlineData` audio as returned by the generative API.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::pcm::{MimePolicy, PcmError, PcmFormat, pcm16_from_le_bytes};
use super::wav::encode_wav;

#[derive(Debug, Error)]
pub enum InlineAudioError {
    #[error("Inline audio is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Pcm(#[from] PcmError),
}

/// A `{ "mimeType": ..., "data": <base64> }` blob.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineAudio {
    pub mime_type: String,
    pub data: String,
}

impl InlineAudio {
    pub fn is_audio(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("audio/")
    }

    /// Decode the payload as PCM16 and wrap it in a WAV container.
    pub fn to_wav(&self, policy: MimePolicy) -> Result<Vec<u8>, InlineAudioError> {
        let format = PcmFormat::from_mime(&self.mime_type, policy)?;
        let raw = BASE64_STANDARD.decode(self.data.trim())?;
        let samples = pcm16_from_le_bytes(&raw, policy)?;

        log::debug!(
            "Inline audio: {} bytes base64 → {} samples @ {} Hz",
            self.data.len(),
            samples.len(),
            format.sample_rate
        );

        Ok(encode_wav(&samples, format.sample_rate))
    }
}
