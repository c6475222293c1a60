//! gemini - Generative language API client
//!
//! Text replies and speech synthesis both go through `generateContent`;
//! speech comes back as base64 PCM16 in an `inlineData` part.

mod client;
pub mod messages;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::InlineAudio;
use crate::protocol::ChatMessage;

pub use client::GeminiClient;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Request to generative API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Generative API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("No user message to reply to")]
    EmptyConversation,
    #[error("Generative API returned no text")]
    EmptyResponse,
    #[error("Generative API returned no audio")]
    NoAudio,
}

/// The AI side of a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next reply given the recent chat history, oldest first.
    async fn reply(&self, history: &[ChatMessage]) -> Result<String, GeminiError>;

    /// Speak `text`; returns raw PCM16 as base64 inline data.
    async fn synthesize(&self, text: &str) -> Result<InlineAudio, GeminiError>;
}
