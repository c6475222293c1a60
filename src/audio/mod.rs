//! audio - Reply audio conversion and playback
//!
//! The generative API returns speech as base64 raw PCM16. This module turns
//! that into a standalone WAV container and hands it to a playback sink.

pub mod inline;
pub mod pcm;
pub mod sink;
pub mod wav;

pub use inline::{InlineAudio, InlineAudioError};
pub use pcm::{DEFAULT_SAMPLE_RATE, MimePolicy, PcmError, PcmFormat, pcm16_from_le_bytes};
pub use sink::{AudioClip, AudioSink, CommandSink, NullSink, WavFileSink, sink_from_config};
pub use wav::{DecodedWav, WavError, decode_wav, encode_wav};
