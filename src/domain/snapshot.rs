use super::{
    events::StreamKind,
    member::{Member, TypingSignal},
    message::{Message, PendingMessage},
    session::{Identity, Session},
    status::{ConnectivityHealth, SessionPhase, StatusError},
    venue_event::VenueEvent,
};

/// Read-only view handed to observers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub session: Option<Session>,
    pub identity: Option<Identity>,
    /// Chronological, confirmed messages only.
    pub messages: Vec<Message>,
    pub pending: Vec<PendingMessage>,
    pub members: Vec<Member>,
    pub typing: Vec<TypingSignal>,
    pub events: Vec<VenueEvent>,
    pub connectivity: ConnectivityHealth,
    pub channels: Vec<(StreamKind, bool)>,
    pub joined: bool,
    pub error: Option<StatusError>,
}

impl SessionSnapshot {
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }
}
