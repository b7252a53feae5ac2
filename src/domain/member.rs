use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub identity_id: String,
    pub session_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// False once the member left; the row itself is kept by the store.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Derived on read from `last_active_at`; never trusted from the wire.
    #[serde(default, skip_deserializing)]
    pub is_online: bool,
}

fn default_active() -> bool {
    true
}

impl Member {
    pub fn online_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.is_active && now - self.last_active_at < threshold
    }
}

/// Ephemeral "is typing" marker. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub identity_id: String,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}
