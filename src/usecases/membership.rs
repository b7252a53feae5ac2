//! Joining, leaving and heartbeating a session roster.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    domain::{member::Member, session::Identity},
    usecases::{
        contracts::{ChatStore, MemberUpsert},
        error::{store_call, CoordinationError},
    },
};

const MEMBER_LEAVE_FAILED: &str = "WOLFPACK_MEMBER_LEAVE_FAILED";

pub async fn join_session(
    store: &dyn ChatStore,
    session_id: &str,
    identity: &Identity,
    timeout: Duration,
) -> Result<Member, CoordinationError> {
    let row = MemberUpsert {
        session_id: session_id.to_owned(),
        identity_id: identity.id.clone(),
        display_name: identity.display_name.clone(),
        avatar_ref: identity.avatar_ref.clone(),
    };

    store_call("join_session", timeout, store.upsert_member(row)).await
}

/// Best effort. Local teardown has already happened by the time this runs,
/// so failures are logged and swallowed.
pub async fn leave_session(
    store: &dyn ChatStore,
    session_id: &str,
    identity_id: &str,
    timeout: Duration,
) {
    let result = store_call(
        "leave_session",
        timeout,
        store.mark_member_left(session_id, identity_id),
    )
    .await;

    if let Err(error) = result {
        tracing::warn!(
            code = MEMBER_LEAVE_FAILED,
            session_id,
            error = %error,
            "could not mark member as left"
        );
    }
}

pub async fn heartbeat(
    store: &dyn ChatStore,
    session_id: &str,
    identity_id: &str,
    at: DateTime<Utc>,
    timeout: Duration,
) -> Result<(), CoordinationError> {
    store_call(
        "heartbeat",
        timeout,
        store.touch_member(session_id, identity_id, at),
    )
    .await
}
