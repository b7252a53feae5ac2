use serde::{Deserialize, Serialize};

/// A chat/presence scope, one per venue or room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Human-facing code printed at the venue (e.g. `ABC123`).
    pub handle: Option<String>,
    pub is_active: bool,
}

impl Session {
    /// A session referenced directly by canonical id; no lookup was made.
    pub fn from_canonical_id(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            handle: None,
            is_active: true,
        }
    }
}

/// The authenticated caller, stamped onto outgoing writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}
