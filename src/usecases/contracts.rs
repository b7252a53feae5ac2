//! Boundaries to the collaborators this core does not own: the persistent
//! store and the authentication provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::{
    domain::{
        events::StreamKind,
        member::Member,
        message::{Message, MessageKind, Reaction},
        session::Session,
        venue_event::VenueEvent,
    },
    usecases::error::{AuthError, StoreError},
};

/// Row handed to the store for a new message. The store assigns `id` and
/// `created_at` and echoes `nonce` back on the insert notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub author_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub image_ref: Option<String>,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReaction {
    pub session_id: String,
    pub message_id: String,
    pub author_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpsert {
    pub session_id: String,
    pub identity_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingBroadcast {
    pub session_id: String,
    pub identity_id: String,
    pub display_name: String,
    pub typing: bool,
}

/// Kind of row change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Raw change pushed by the store. `record` is untyped until decoded by
/// the realtime layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreNotification {
    pub stream: StreamKind,
    pub op: ChangeOp,
    pub record: serde_json::Value,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub session_id: String,
    pub stream: StreamKind,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Looks up a session by its human handle.
    async fn find_session(&self, handle: &str) -> Result<Option<Session>, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Fails with `StoreError::Conflict` when (message, author, emoji)
    /// already exists.
    async fn insert_reaction(&self, reaction: NewReaction) -> Result<Reaction, StoreError>;

    async fn delete_reaction(&self, reaction_id: &str) -> Result<(), StoreError>;

    async fn upsert_member(&self, member: MemberUpsert) -> Result<Member, StoreError>;

    async fn mark_member_left(&self, session_id: &str, identity_id: &str)
        -> Result<(), StoreError>;

    async fn touch_member(
        &self,
        session_id: &str,
        identity_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Most recent `limit` messages with their reactions, oldest first.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn active_members(&self, session_id: &str) -> Result<Vec<Member>, StoreError>;

    async fn venue_events(&self, session_id: &str) -> Result<Vec<VenueEvent>, StoreError>;

    async fn publish_typing(&self, signal: TypingBroadcast) -> Result<(), StoreError>;

    /// Opens one notification stream. The stream ends when the store drops
    /// the subscription.
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> Result<mpsc::UnboundedReceiver<StoreNotification>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<AuthUser>, AuthError>;

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError>;

    /// Bumped whenever the ambient credential changes or is lost.
    fn session_generation(&self) -> watch::Receiver<u64>;
}
