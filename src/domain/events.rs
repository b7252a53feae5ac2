use serde::{Deserialize, Serialize};

use super::{
    member::Member,
    message::{Message, Reaction},
    venue_event::VenueEvent,
};

/// One logical realtime stream of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Messages,
    Reactions,
    Members,
    Events,
    Typing,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Messages,
        StreamKind::Reactions,
        StreamKind::Members,
        StreamKind::Events,
        StreamKind::Typing,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Reactions => "reactions",
            Self::Members => "members",
            Self::Events => "events",
            Self::Typing => "typing",
        }
    }
}

/// Server-originated change, decoded once at the subscription boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    MessageCreated(Message),
    MessageUpdated(Message),
    ReactionAdded(Reaction),
    ReactionRemoved {
        reaction_id: String,
        message_id: Option<String>,
    },
    MemberJoined(Member),
    MemberUpdated(Member),
    MemberLeft {
        identity_id: String,
    },
    EventCreated(VenueEvent),
    EventUpdated(VenueEvent),
    EventDeleted {
        event_id: String,
    },
    TypingStarted {
        identity_id: String,
        display_name: String,
    },
    TypingStopped {
        identity_id: String,
    },
}

impl DomainEvent {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message_created",
            Self::MessageUpdated(_) => "message_updated",
            Self::ReactionAdded(_) => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::MemberJoined(_) => "member_joined",
            Self::MemberUpdated(_) => "member_updated",
            Self::MemberLeft { .. } => "member_left",
            Self::EventCreated(_) => "event_created",
            Self::EventUpdated(_) => "event_updated",
            Self::EventDeleted { .. } => "event_deleted",
            Self::TypingStarted { .. } => "typing_started",
            Self::TypingStopped { .. } => "typing_stopped",
        }
    }
}
