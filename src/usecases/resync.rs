use std::time::Duration;

use crate::{
    domain::{member::Member, message::Message, venue_event::VenueEvent},
    usecases::{
        contracts::ChatStore,
        error::{store_call, CoordinationError},
    },
};

/// Authoritative state fetched after (re)connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionWindow {
    pub messages: Vec<Message>,
    pub members: Vec<Member>,
    pub events: Vec<VenueEvent>,
}

pub async fn fetch_window(
    store: &dyn ChatStore,
    session_id: &str,
    limit: usize,
    timeout: Duration,
) -> Result<SessionWindow, CoordinationError> {
    let (messages, members, events) = tokio::try_join!(
        store_call("resync", timeout, store.recent_messages(session_id, limit)),
        store_call("resync", timeout, store.active_members(session_id)),
        store_call("resync", timeout, store.venue_events(session_id)),
    )?;

    Ok(SessionWindow {
        messages,
        members,
        events,
    })
}
