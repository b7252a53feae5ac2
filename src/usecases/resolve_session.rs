//! Maps a human session code or a canonical id to a `Session`.

use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use crate::{
    domain::{
        session::Session,
        validation::{validate_identifier, validate_session_handle},
    },
    usecases::{
        contracts::ChatStore,
        error::{store_call, CoordinationError, StoreError},
    },
};

const SESSION_RESOLVED: &str = "WOLFPACK_SESSION_RESOLVED";
const SESSION_UNRESOLVED: &str = "WOLFPACK_SESSION_UNRESOLVED";

/// What a piece of user input looks like before any lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    CanonicalId,
    Handle,
    Invalid,
}

impl InputShape {
    pub fn classify(input: &str) -> Self {
        let input = input.trim();
        if validate_identifier(input) {
            Self::CanonicalId
        } else if validate_session_handle(input) {
            Self::Handle
        } else {
            Self::Invalid
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::CanonicalId => "canonical_id",
            Self::Handle => "handle",
            Self::Invalid => "invalid",
        }
    }
}

pub struct SessionResolver {
    store: Arc<dyn ChatStore>,
    timeout: Duration,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn ChatStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Canonical ids are accepted without a lookup. Handles cost one store
    /// round-trip, then stay cached for the life of the resolver.
    pub async fn resolve(&self, handle_or_id: &str) -> Result<Session, CoordinationError> {
        let input = handle_or_id.trim();
        if let Some(cached) = self.cached(input) {
            return Ok(cached);
        }

        let session = match InputShape::classify(input) {
            InputShape::CanonicalId => Session::from_canonical_id(&input.to_ascii_lowercase()),
            InputShape::Handle => self.lookup(input).await?,
            InputShape::Invalid => {
                tracing::debug!(code = SESSION_UNRESOLVED, "session input has no valid shape");
                return Err(CoordinationError::InvalidSession);
            }
        };

        tracing::info!(
            code = SESSION_RESOLVED,
            session_id = %session.id,
            "session resolved"
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(input.to_owned(), session.clone());
        }
        Ok(session)
    }

    async fn lookup(&self, handle: &str) -> Result<Session, CoordinationError> {
        let found = store_call("resolve_session", self.timeout, self.store.find_session(handle))
            .await
            .or_else(|error| match error {
                CoordinationError::StoreFailure(StoreError::NotFound) => Ok(None),
                other => Err(other),
            })?;

        match found {
            Some(session) if session.is_active => Ok(session),
            Some(_) | None => {
                tracing::info!(
                    code = SESSION_UNRESOLVED,
                    handle,
                    "no active session for handle"
                );
                Err(CoordinationError::InvalidSession)
            }
        }
    }

    fn cached(&self, input: &str) -> Option<Session> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(input).cloned())
    }
}
