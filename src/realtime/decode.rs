//! Turns raw store notifications into typed domain events. Nothing past
//! this module looks at untyped payloads.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    domain::{
        events::{DomainEvent, StreamKind},
        member::Member,
        message::{Message, Reaction},
        venue_event::VenueEvent,
    },
    usecases::contracts::{ChangeOp, StoreNotification},
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {stream} payload: {source}")]
    Payload {
        stream: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{stream} delete without an id")]
    MissingId { stream: &'static str },
}

#[derive(Debug, Deserialize)]
struct RowId {
    id: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypingRow {
    identity_id: String,
    #[serde(default)]
    display_name: String,
}

/// Returns `Ok(None)` for changes this core does not track, such as
/// message deletes.
pub fn decode(notification: StoreNotification) -> Result<Option<DomainEvent>, DecodeError> {
    let StoreNotification {
        stream,
        op,
        record,
        old,
    } = notification;

    let event = match (stream, op) {
        (StreamKind::Messages, ChangeOp::Insert) => {
            DomainEvent::MessageCreated(parse::<Message>(stream, record)?)
        }
        (StreamKind::Messages, ChangeOp::Update) => {
            DomainEvent::MessageUpdated(parse::<Message>(stream, record)?)
        }
        (StreamKind::Messages, ChangeOp::Delete) => return Ok(None),

        (StreamKind::Reactions, ChangeOp::Insert) => {
            DomainEvent::ReactionAdded(parse::<Reaction>(stream, record)?)
        }
        (StreamKind::Reactions, ChangeOp::Update) => return Ok(None),
        (StreamKind::Reactions, ChangeOp::Delete) => {
            let row = deleted_row(stream, record, old)?;
            DomainEvent::ReactionRemoved {
                reaction_id: row.id,
                message_id: row.message_id,
            }
        }

        (StreamKind::Members, ChangeOp::Insert) => {
            DomainEvent::MemberJoined(parse::<Member>(stream, record)?)
        }
        (StreamKind::Members, ChangeOp::Update) => {
            let member = parse::<Member>(stream, record)?;
            if member.is_active {
                DomainEvent::MemberUpdated(member)
            } else {
                DomainEvent::MemberLeft {
                    identity_id: member.identity_id,
                }
            }
        }
        (StreamKind::Members, ChangeOp::Delete) => {
            let identity_id = old
                .as_ref()
                .and_then(|old| old.get("identity_id"))
                .or_else(|| record.get("identity_id"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(DecodeError::MissingId {
                    stream: stream.as_label(),
                })?;
            DomainEvent::MemberLeft { identity_id }
        }

        (StreamKind::Events, ChangeOp::Insert) => {
            DomainEvent::EventCreated(parse::<VenueEvent>(stream, record)?)
        }
        (StreamKind::Events, ChangeOp::Update) => {
            DomainEvent::EventUpdated(parse::<VenueEvent>(stream, record)?)
        }
        (StreamKind::Events, ChangeOp::Delete) => DomainEvent::EventDeleted {
            event_id: deleted_row(stream, record, old)?.id,
        },

        (StreamKind::Typing, ChangeOp::Insert | ChangeOp::Update) => {
            let row = parse::<TypingRow>(stream, record)?;
            DomainEvent::TypingStarted {
                identity_id: row.identity_id,
                display_name: row.display_name,
            }
        }
        (StreamKind::Typing, ChangeOp::Delete) => DomainEvent::TypingStopped {
            identity_id: parse::<TypingRow>(stream, record)?.identity_id,
        },
    };

    Ok(Some(event))
}

fn parse<T: for<'de> Deserialize<'de>>(stream: StreamKind, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        stream: stream.as_label(),
        source,
    })
}

/// Deletes may carry the full old row, only the key, or both.
fn deleted_row(stream: StreamKind, record: Value, old: Option<Value>) -> Result<RowId, DecodeError> {
    let from_old = old.and_then(|old| serde_json::from_value::<RowId>(old).ok());
    let from_record = serde_json::from_value::<RowId>(record).ok();

    match (from_old, from_record) {
        (Some(old), Some(record)) => Ok(RowId {
            id: record.id,
            message_id: record.message_id.or(old.message_id),
        }),
        (Some(row), None) | (None, Some(row)) => Ok(row),
        (None, None) => Err(DecodeError::MissingId {
            stream: stream.as_label(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn notification(stream: StreamKind, op: ChangeOp, record: Value) -> StoreNotification {
        StoreNotification {
            stream,
            op,
            record,
            old: None,
        }
    }

    fn message_json(id: &str) -> Value {
        json!({
            "id": id,
            "session_id": "s1",
            "author_id": "u1",
            "display_name": "Ana",
            "avatar_ref": null,
            "content": "hello",
            "kind": "text",
            "image_ref": null,
            "created_at": "2024-01-01T20:00:00Z",
            "edited_at": null,
            "nonce": "n1"
        })
    }

    #[test]
    fn decodes_message_insert_with_nonce() {
        let event = decode(notification(
            StreamKind::Messages,
            ChangeOp::Insert,
            message_json("m1"),
        ))
        .expect("decode should succeed");

        let Some(DomainEvent::MessageCreated(message)) = event else {
            panic!("expected MessageCreated, got {event:?}");
        };
        assert_eq!(message.id, "m1");
        assert_eq!(message.nonce.as_deref(), Some("n1"));
        assert!(!message.flagged);
        assert!(message.reactions.is_empty());
    }

    #[test]
    fn reaction_delete_reads_message_id_from_old_row() {
        let event = decode(StoreNotification {
            stream: StreamKind::Reactions,
            op: ChangeOp::Delete,
            record: json!({ "id": "r1" }),
            old: Some(json!({
                "id": "r1",
                "message_id": "m1",
                "author_id": "u1",
                "emoji": "🔥",
                "created_at": "2024-01-01T20:00:00Z"
            })),
        })
        .expect("decode should succeed");

        assert_eq!(
            event,
            Some(DomainEvent::ReactionRemoved {
                reaction_id: "r1".to_owned(),
                message_id: Some("m1".to_owned()),
            })
        );
    }

    #[test]
    fn inactive_member_update_becomes_member_left() {
        let event = decode(notification(
            StreamKind::Members,
            ChangeOp::Update,
            json!({
                "identity_id": "u1",
                "session_id": "s1",
                "display_name": "Ana",
                "avatar_ref": null,
                "joined_at": "2024-01-01T20:00:00Z",
                "last_active_at": "2024-01-01T20:00:00Z",
                "is_active": false
            }),
        ))
        .expect("decode should succeed");

        assert_eq!(
            event,
            Some(DomainEvent::MemberLeft {
                identity_id: "u1".to_owned()
            })
        );
    }

    #[test]
    fn typing_insert_and_delete_map_to_start_and_stop() {
        let started = decode(notification(
            StreamKind::Typing,
            ChangeOp::Insert,
            json!({ "identity_id": "u2", "display_name": "Bo" }),
        ))
        .expect("decode should succeed");
        let stopped = decode(notification(
            StreamKind::Typing,
            ChangeOp::Delete,
            json!({ "identity_id": "u2" }),
        ))
        .expect("decode should succeed");

        assert!(matches!(started, Some(DomainEvent::TypingStarted { .. })));
        assert_eq!(
            stopped,
            Some(DomainEvent::TypingStopped {
                identity_id: "u2".to_owned()
            })
        );
    }

    #[test]
    fn message_deletes_are_ignored() {
        let event = decode(notification(
            StreamKind::Messages,
            ChangeOp::Delete,
            json!({ "id": "m1" }),
        ))
        .expect("decode should succeed");

        assert!(event.is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let error = decode(notification(
            StreamKind::Events,
            ChangeOp::Insert,
            json!({ "id": 12 }),
        ))
        .expect_err("decode should fail");

        assert!(error.to_string().starts_with("malformed events payload"));
    }

    #[test]
    fn event_delete_without_id_is_an_error() {
        let result = decode(notification(StreamKind::Events, ChangeOp::Delete, json!({})));

        assert!(matches!(result, Err(DecodeError::MissingId { stream: "events" })));
    }
}
