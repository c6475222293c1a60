use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Session;

/// `user_id` written on messages authored by the AI.
pub const AI_USER_ID: &str = "ai-assistant";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Set a nickname before sending messages")]
    NoNickname,
    #[error("Message text is empty")]
    EmptyText,
    #[error("Message is {len} characters, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// A message document as stored in the shared collection.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub nickname: String,
    pub text: String,
    #[serde(default)]
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// A message that has not been written yet; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub user_id: String,
    pub nickname: String,
    pub text: String,
    pub is_ai: bool,
}

impl NewMessage {
    pub fn user(session: &Session, text: &str, max_len: usize) -> Result<Self, MessageError> {
        let nickname = session.nickname.as_ref().ok_or(MessageError::NoNickname)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(MessageError::EmptyText);
        }
        let len = text.chars().count();
        if len > max_len {
            return Err(MessageError::TooLong { len, max: max_len });
        }
        Ok(Self {
            user_id: session.user_id.clone(),
            nickname: nickname.clone(),
            text: text.to_string(),
            is_ai: false,
        })
    }

    pub fn ai(display_name: &str, text: &str) -> Result<Self, MessageError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MessageError::EmptyText);
        }
        Ok(Self {
            user_id: AI_USER_ID.to_string(),
            nickname: display_name.to_string(),
            text: text.to_string(),
            is_ai: true,
        })
    }

    pub fn into_message(self, id: String, created_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id,
            user_id: self.user_id,
            nickname: self.nickname,
            text: self.text,
            is_ai: self.is_ai,
            created_at,
        }
    }
}

/// One live-feed event: the most recent messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBatch {
    /// Store revision this snapshot was taken at
    pub revision: u64,
    pub messages: Vec<ChatMessage>,
}
