//! Raw PCM16 helpers: byte reinterpretation and `audio/L16` MIME parsing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate assumed when the MIME type carries no usable `rate=`.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// How to treat audio metadata that does not match `audio/L16;rate=<n>`.
///
/// - Lenient (default): fall back to [`DEFAULT_SAMPLE_RATE`], accept any MIME
///   type and drop a dangling odd byte.
/// - Strict: reject all of the above.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MimePolicy {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcmError {
    #[error("Unsupported audio MIME type: {0}")]
    UnsupportedMime(String),
    #[error("MIME type {0} has no usable rate parameter")]
    MissingRate(String),
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),
}

/// Mono 16-bit PCM stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
}

impl PcmFormat {
    /// Parse e.g. `audio/L16;codec=pcm;rate=24000`.
    pub fn from_mime(mime: &str, policy: MimePolicy) -> Result<Self, PcmError> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default();

        if policy == MimePolicy::Strict && !essence.eq_ignore_ascii_case("audio/l16") {
            return Err(PcmError::UnsupportedMime(mime.to_string()));
        }

        let rate = parts
            .filter_map(|p| p.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse::<u32>().ok())
            .filter(|&rate| rate > 0);

        match (rate, policy) {
            (Some(sample_rate), _) => Ok(Self { sample_rate }),
            (None, MimePolicy::Lenient) => {
                log::debug!("No usable rate in {:?}, assuming {} Hz", mime, DEFAULT_SAMPLE_RATE);
                Ok(Self {
                    sample_rate: DEFAULT_SAMPLE_RATE,
                })
            }
            (None, MimePolicy::Strict) => Err(PcmError::MissingRate(mime.to_string())),
        }
    }
}

/// Reinterpret little-endian bytes as i16 samples.
pub fn pcm16_from_le_bytes(bytes: &[u8], policy: MimePolicy) -> Result<Vec<i16>, PcmError> {
    if bytes.len() % 2 != 0 {
        match policy {
            MimePolicy::Strict => return Err(PcmError::OddLength(bytes.len())),
            MimePolicy::Lenient => {
                log::warn!("PCM16 payload has odd length {}, dropping last byte", bytes.len());
            }
        }
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
