//! ai_chat_rs - Shared chat room with an AI participant
//!
//! Users post into one live message feed; the AI answers in the same feed and
//! can optionally speak its replies. Speech arrives as raw PCM16 which
//! [`audio::encode_wav`] wraps into a playable WAV file.

pub mod audio;
pub mod config;
pub mod console_bridge;
pub mod controller;
pub mod gemini;
pub mod identity;
pub mod protocol;
pub mod store;
