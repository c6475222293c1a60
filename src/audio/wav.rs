//! Mono 16-bit PCM WAV container writer and reader.
//!
//! - Encoder: i16 samples + sample rate → 44-byte RIFF header + LE sample data
//! - Decoder: the same layout back to samples + sample rate

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Size of the fixed RIFF/WAVE header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("WAV data too short: {0} bytes, need at least 44")]
    Truncated(usize),
    #[error("Unexpected chunk marker at byte {offset}: expected {expected:?}")]
    BadMarker {
        offset: usize,
        expected: &'static str,
    },
    #[error("Unsupported audio format tag {0}, only linear PCM (1) is supported")]
    UnsupportedFormat(u16),
    #[error("Unsupported channel count {0}, only mono is supported")]
    UnsupportedChannels(u16),
    #[error("Unsupported bit depth {0}, only 16-bit samples are supported")]
    UnsupportedBitDepth(u16),
    #[error("Declared data length {declared} does not fit the {available} available bytes")]
    BadDataLength { declared: u32, available: usize },
}

/// Samples and sample rate recovered from a WAV buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedWav {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

// ======================== Encoder ========================

/// Wrap mono 16-bit PCM samples in a playable WAV container.
///
/// * `samples`     - Mono samples in playback order
/// * `sample_rate` - Written verbatim into the header, 0 included
///
/// Output is always `44 + 2 * samples.len()` bytes. Header size fields are
/// 32-bit and wrap for inputs of 2^31 samples or more.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len().wrapping_mul(2) as u32;

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2);
    put_header(&mut buf, sample_rate, data_len);
    for &sample in samples {
        buf.put_i16_le(sample);
    }

    buf
}

fn put_header(buf: &mut impl BufMut, sample_rate: u32, data_len: u32) {
    let byte_rate = sample_rate.wrapping_mul(BLOCK_ALIGN as u32);

    // RIFF header
    buf.put_slice(b"RIFF");
    buf.put_u32_le(data_len.wrapping_add(36));
    buf.put_slice(b"WAVE");

    // fmt sub-chunk
    buf.put_slice(b"fmt ");
    buf.put_u32_le(FMT_CHUNK_LEN);
    buf.put_u16_le(FORMAT_PCM);
    buf.put_u16_le(CHANNELS);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(BLOCK_ALIGN);
    buf.put_u16_le(BITS_PER_SAMPLE);

    // data sub-chunk
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
}

// ======================== Decoder ========================

/// Parse a buffer produced by [`encode_wav`] back into samples.
///
/// Only the canonical 44-byte mono PCM16 layout is accepted. Bytes past the
/// declared data length are ignored.
pub fn decode_wav(data: &[u8]) -> Result<DecodedWav, WavError> {
    if data.len() < WAV_HEADER_LEN {
        return Err(WavError::Truncated(data.len()));
    }

    let mut header = &data[..WAV_HEADER_LEN];

    expect_marker(&mut header, 0, "RIFF")?;
    let _riff_len = header.get_u32_le();
    expect_marker(&mut header, 8, "WAVE")?;
    expect_marker(&mut header, 12, "fmt ")?;
    let _fmt_len = header.get_u32_le();

    let format = header.get_u16_le();
    if format != FORMAT_PCM {
        return Err(WavError::UnsupportedFormat(format));
    }
    let channels = header.get_u16_le();
    if channels != CHANNELS {
        return Err(WavError::UnsupportedChannels(channels));
    }
    let sample_rate = header.get_u32_le();
    let _byte_rate = header.get_u32_le();
    let _block_align = header.get_u16_le();
    let bits = header.get_u16_le();
    if bits != BITS_PER_SAMPLE {
        return Err(WavError::UnsupportedBitDepth(bits));
    }

    expect_marker(&mut header, 36, "data")?;
    let declared = header.get_u32_le();

    let body = &data[WAV_HEADER_LEN..];
    if declared % 2 != 0 || declared as usize > body.len() {
        return Err(WavError::BadDataLength {
            declared,
            available: body.len(),
        });
    }

    let mut body = &body[..declared as usize];
    let mut samples = Vec::with_capacity(declared as usize / 2);
    while body.has_remaining() {
        samples.push(body.get_i16_le());
    }

    Ok(DecodedWav {
        sample_rate,
        samples,
    })
}

fn expect_marker(buf: &mut &[u8], offset: usize, expected: &'static str) -> Result<(), WavError> {
    let mut marker = [0u8; 4];
    buf.copy_to_slice(&mut marker);
    if &marker != expected.as_bytes() {
        return Err(WavError::BadMarker { offset, expected });
    }
    Ok(())
}
