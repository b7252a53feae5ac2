use std::{
    sync::Arc,
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::{
    domain::{
        clock::ManualClock,
        member::Member,
        message::{Message, MessageKind, PendingMessage, Reaction},
        session::Session,
        snapshot::SessionSnapshot,
        venue_event::VenueEvent,
    },
    infra::{memory_store::MemoryStore, stubs::StaticAuthProvider},
    usecases::{context::CoreConfig, coordinator::Coordinator},
};

pub const SESSION_ID: &str = "3f2b8c1e-9d4a-4b6f-8a2e-1c5d7e9f0a3b";
pub const SESSION_HANDLE: &str = "ABC123";
pub const U1: &str = "0b9f6c2a-1d3e-4f5a-9b8c-7d6e5f4a3b2c";
pub const U2: &str = "5e4d3c2b-1a09-4f8e-a7d6-c5b4a3928170";

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_139_200, 0).expect("fixed timestamp should be valid")
}

pub fn message_at(id: &str, content: &str, secs: i64) -> Message {
    Message {
        id: id.to_owned(),
        session_id: "s1".to_owned(),
        author_id: "u1".to_owned(),
        display_name: "Ana".to_owned(),
        avatar_ref: None,
        content: content.to_owned(),
        kind: MessageKind::Text,
        image_ref: None,
        created_at: t0() + Duration::seconds(secs),
        edited_at: None,
        flagged: false,
        nonce: None,
        reactions: Vec::new(),
    }
}

pub fn pending_message(nonce: &str, content: &str) -> PendingMessage {
    PendingMessage {
        nonce: nonce.to_owned(),
        message: message_at(&format!("pending-{nonce}"), content, 0),
    }
}

pub fn reaction(id: &str, message_id: &str, author_id: &str, emoji: &str) -> Reaction {
    Reaction {
        id: id.to_owned(),
        message_id: message_id.to_owned(),
        author_id: author_id.to_owned(),
        emoji: emoji.to_owned(),
        created_at: t0(),
    }
}

pub fn member(identity_id: &str, secs: i64) -> Member {
    let at = t0() + Duration::seconds(secs);
    Member {
        identity_id: identity_id.to_owned(),
        session_id: "s1".to_owned(),
        display_name: format!("member {identity_id}"),
        avatar_ref: None,
        joined_at: at,
        last_active_at: at,
        is_active: true,
        is_online: false,
    }
}

pub fn venue_event(id: &str, secs: i64) -> VenueEvent {
    VenueEvent {
        id: id.to_owned(),
        session_id: "s1".to_owned(),
        title: format!("event {id}"),
        description: None,
        starts_at: t0() + Duration::seconds(secs),
        ends_at: None,
        created_by: None,
    }
}

/// Config tuned for tests: short timeouts, fast reconnects.
pub fn test_config() -> CoreConfig {
    CoreConfig {
        operation_timeout: StdDuration::from_millis(500),
        reconnect_delay: StdDuration::from_millis(10),
        max_reconnect_attempts: 5,
        ..CoreConfig::default()
    }
}

/// In-memory world with one seeded session and two signed-in users.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub auth_u1: Arc<StaticAuthProvider>,
    pub auth_u2: Arc<StaticAuthProvider>,
    pub coordinator_u1: Coordinator,
    pub coordinator_u2: Coordinator,
}

pub fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    store.add_session(Session {
        id: SESSION_ID.to_owned(),
        handle: Some(SESSION_HANDLE.to_owned()),
        is_active: true,
    });

    let auth_u1 = Arc::new(StaticAuthProvider::signed_in(U1, Some("ana@example.com"), Some("Ana")));
    let auth_u2 = Arc::new(StaticAuthProvider::signed_in(U2, Some("bo@example.com"), Some("Bo")));

    let coordinator_u1 = Coordinator::new(
        store.clone(),
        auth_u1.clone(),
        test_config(),
        clock.clone(),
    );
    let coordinator_u2 = Coordinator::new(
        store.clone(),
        auth_u2.clone(),
        test_config(),
        clock.clone(),
    );

    Harness {
        clock,
        store,
        auth_u1,
        auth_u2,
        coordinator_u1,
        coordinator_u2,
    }
}

/// Waits until an emitted snapshot satisfies `predicate`.
pub async fn wait_for_snapshot<F>(
    rx: &mut mpsc::UnboundedReceiver<SessionSnapshot>,
    predicate: F,
) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let waited = tokio::time::timeout(StdDuration::from_secs(2), async {
        while let Some(snapshot) = rx.recv().await {
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    })
    .await;

    match waited {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => panic!("snapshot stream closed before predicate matched"),
        Err(_) => panic!("timed out waiting for snapshot"),
    }
}
