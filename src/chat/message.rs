//! Rendered chat messages

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the rendered message list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    /// Text content; grows while an assistant message is open
    pub content: String,
    /// Image reference for image generation replies
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Whether the message is still receiving deltas
    pub open: bool,
}

impl Message {
    /// A finished user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
            timestamp: Utc::now(),
            open: false,
        }
    }

    /// An empty assistant message awaiting deltas
    #[must_use]
    pub fn pending_assistant() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            image: None,
            timestamp: Utc::now(),
            open: true,
        }
    }

    /// Whether this is an assistant message still receiving deltas
    #[must_use]
    pub fn is_open_assistant(&self) -> bool {
        self.role == Role::Assistant && self.open
    }
}
