use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    System,
}

impl MessageKind {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub author_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub author_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flagged: bool,
    /// Client correlation id echoed back by the store for messages this
    /// client submitted.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Arrival-ordered, at most one per (author, emoji).
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Returns the display content: image marker + caption, or just text.
    pub fn display_content(&self) -> String {
        match (self.kind, self.content.is_empty()) {
            (MessageKind::Image, true) => "[Image]".to_owned(),
            (MessageKind::Image, false) => format!("[Image] {}", self.content),
            _ => self.content.clone(),
        }
    }

    pub(crate) fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// What the caller wants to post. Content is sanitized before it leaves
/// the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub kind: MessageKind,
    pub image_ref: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            image_ref: None,
        }
    }

    pub fn image(image_ref: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            content: caption.into(),
            kind: MessageKind::Image,
            image_ref: Some(image_ref.into()),
        }
    }
}

/// A locally-visible message that the store has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub nonce: String,
    pub message: Message,
}
