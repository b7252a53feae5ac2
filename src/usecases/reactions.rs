use std::time::Duration;

use crate::{
    domain::{
        message::Reaction,
        session::Identity,
        validation::{validate_emoji, validate_identifier},
    },
    usecases::{
        contracts::{ChatStore, NewReaction},
        error::{store_call, CoordinationError, StoreError},
    },
};

pub fn prepare_reaction(
    session_id: &str,
    identity: &Identity,
    message_id: &str,
    emoji: &str,
) -> Result<NewReaction, CoordinationError> {
    if !validate_identifier(message_id) {
        return Err(CoordinationError::invalid_input("message_id", "malformed id"));
    }
    if !validate_emoji(emoji) {
        return Err(CoordinationError::invalid_input("emoji", "not an allowed reaction"));
    }

    Ok(NewReaction {
        session_id: session_id.to_owned(),
        message_id: message_id.to_owned(),
        author_id: identity.id.clone(),
        emoji: emoji.to_owned(),
    })
}

/// Only the author may take a reaction back.
pub fn authorize_removal(
    reaction: Option<&Reaction>,
    identity: &Identity,
) -> Result<(), CoordinationError> {
    match reaction {
        None => Err(CoordinationError::invalid_input("reaction_id", "unknown reaction")),
        Some(reaction) if reaction.author_id != identity.id => {
            Err(CoordinationError::PermissionDenied)
        }
        Some(_) => Ok(()),
    }
}

/// `Ok(None)` when the store already holds the same (message, author,
/// emoji) reaction.
pub async fn add_reaction(
    store: &dyn ChatStore,
    reaction: NewReaction,
    timeout: Duration,
) -> Result<Option<Reaction>, CoordinationError> {
    match store_call("add_reaction", timeout, store.insert_reaction(reaction)).await {
        Ok(reaction) => Ok(Some(reaction)),
        Err(CoordinationError::StoreFailure(StoreError::Conflict)) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Removing something that is already gone is not an error.
pub async fn remove_reaction(
    store: &dyn ChatStore,
    reaction_id: &str,
    timeout: Duration,
) -> Result<(), CoordinationError> {
    match store_call("remove_reaction", timeout, store.delete_reaction(reaction_id)).await {
        Ok(()) | Err(CoordinationError::StoreFailure(StoreError::NotFound)) => Ok(()),
        Err(error) => Err(error),
    }
}
