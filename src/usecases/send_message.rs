//! Use case for posting a message to a session.
//!
//! `prepare_message` turns a draft into a store row (sanitized, validated,
//! stamped with the caller's identity and a nonce); `submit_message`
//! performs the store round-trip.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        message::{Message, MessageDraft, MessageKind, PendingMessage},
        session::Identity,
        validation::{sanitize_message, validate_image_ref},
    },
    usecases::{
        contracts::{ChatStore, NewMessage},
        error::{store_call, CoordinationError},
    },
};

/// Command to post a draft into a specific session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub session_id: String,
    pub identity: Identity,
    pub draft: MessageDraft,
    pub nonce: String,
}

/// Validates the draft and builds the row the store will receive.
///
/// # Errors
/// `InvalidInput` when the sanitized text is empty for a text message,
/// when an image message has a missing or unsafe `image_ref`, or when the
/// caller tries to post a system message.
pub fn prepare_message(command: SendMessageCommand) -> Result<NewMessage, CoordinationError> {
    let SendMessageCommand {
        session_id,
        identity,
        draft,
        nonce,
    } = command;

    let content = sanitize_message(&draft.content);
    let image_ref = match draft.kind {
        MessageKind::Text => {
            if content.is_empty() {
                return Err(CoordinationError::invalid_input("content", "empty message"));
            }
            None
        }
        MessageKind::Image => {
            let image_ref = draft
                .image_ref
                .map(|url| url.trim().to_owned())
                .filter(|url| validate_image_ref(url))
                .ok_or(CoordinationError::invalid_input(
                    "image_ref",
                    "must be an https image link",
                ))?;
            Some(image_ref)
        }
        MessageKind::System => {
            return Err(CoordinationError::invalid_input(
                "kind",
                "system messages are not accepted from clients",
            ));
        }
    };

    Ok(NewMessage {
        session_id,
        author_id: identity.id,
        display_name: identity.display_name,
        avatar_ref: identity.avatar_ref,
        content,
        kind: draft.kind,
        image_ref,
        nonce,
    })
}

/// The locally visible placeholder for a prepared message.
pub fn pending_for(message: &NewMessage, now: DateTime<Utc>) -> PendingMessage {
    PendingMessage {
        nonce: message.nonce.clone(),
        message: Message {
            id: format!("pending-{}", message.nonce),
            session_id: message.session_id.clone(),
            author_id: message.author_id.clone(),
            display_name: message.display_name.clone(),
            avatar_ref: message.avatar_ref.clone(),
            content: message.content.clone(),
            kind: message.kind,
            image_ref: message.image_ref.clone(),
            created_at: now,
            edited_at: None,
            flagged: false,
            nonce: Some(message.nonce.clone()),
            reactions: Vec::new(),
        },
    }
}

/// Writes the message. Resolves on store acknowledgement; the log itself
/// is updated by the insert notification.
pub async fn submit_message(
    store: &dyn ChatStore,
    message: NewMessage,
    timeout: Duration,
) -> Result<Message, CoordinationError> {
    store_call("send_message", timeout, store.insert_message(message)).await
}
