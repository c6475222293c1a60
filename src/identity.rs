use std::path::Path;

use thiserror::Error;
use uuid::Uuid;

pub const MAX_NICKNAME_CHARS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NicknameError {
    #[error("Nickname cannot be empty")]
    Empty,
    #[error("Nickname is longer than {} characters", MAX_NICKNAME_CHARS)]
    TooLong,
    #[error("Nickname cannot contain control characters")]
    ControlCharacter,
}

/// Who is chatting from this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub nickname: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: None,
        }
    }

    pub fn set_nickname(&mut self, raw: &str) -> Result<&str, NicknameError> {
        let nickname = validate_nickname(raw)?;
        Ok(self.nickname.insert(nickname))
    }
}

/// Trim and check a nickname.
pub fn validate_nickname(raw: &str) -> Result<String, NicknameError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NicknameError::Empty);
    }
    if trimmed.chars().count() > MAX_NICKNAME_CHARS {
        return Err(NicknameError::TooLong);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(NicknameError::ControlCharacter);
    }
    Ok(trimmed.to_string())
}

/// 先从本地文件读取用户ID，不存在则生成新的UUID并保存
pub fn load_or_create_user_id(path: &Path) -> String {
    if let Ok(content) = std::fs::read_to_string(path) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            log::info!("Loaded user id from {}", path.display());
            return trimmed.to_string();
        }
    }

    let user_id = Uuid::new_v4().to_string();
    log::info!("Generated new user id: {}", user_id);
    if let Err(e) = std::fs::write(path, &user_id) {
        log::warn!("Failed to save user id to {}: {}", path.display(), e);
    } else {
        log::info!("Saved user id to {}", path.display());
    }
    user_id
}
