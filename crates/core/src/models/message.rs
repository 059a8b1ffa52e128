//! Message model for project chat

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserSummary;
use crate::error::{Error, Result};

/// Upper bound on a single chat message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// A chat message in a project. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    /// Per-project position assigned by the store; 0 until persisted
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an unsaved message, rejecting blank or oversized text
    pub fn new(project_id: Uuid, sender_id: Uuid, text: String) -> Result<Self> {
        validate_text(&text)?;
        Ok(Self {
            id: Uuid::new_v4(),
            project_id,
            sender_id,
            text,
            seq: 0,
            created_at: Utc::now(),
        })
    }

    pub fn is_persisted(&self) -> bool {
        self.seq > 0
    }
}

pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::InvalidArgument("message text must not be blank".into()));
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(Error::InvalidArgument(format!(
            "message text too long: {} chars (max {})",
            chars, MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

/// A stored message together with who sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub message: Message,
    pub sender: UserSummary,
}

impl ChatEntry {
    pub fn format_timestamp(&self) -> String {
        self.message.created_at.format("%H:%M").to_string()
    }
}
