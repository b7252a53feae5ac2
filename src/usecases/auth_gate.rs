//! Resolves the caller's identity and stamps a display profile on it.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::watch;

use crate::{
    domain::{session::Identity, validation::sanitize_display_name},
    usecases::{
        contracts::{AuthProvider, AuthUser, Profile},
        error::{AuthError, CoordinationError},
    },
};

const AUTH_IDENTITY_RESOLVED: &str = "WOLFPACK_AUTH_IDENTITY_RESOLVED";
const AUTH_PROVIDER_UNAVAILABLE: &str = "WOLFPACK_AUTH_PROVIDER_UNAVAILABLE";
const AUTH_SESSION_CHANGED: &str = "WOLFPACK_AUTH_SESSION_CHANGED";

const FALLBACK_DISPLAY_NAME: &str = "Member";

pub struct AuthGate {
    provider: Arc<dyn AuthProvider>,
    timeout: Duration,
    cached: Mutex<Option<Identity>>,
    generation: Mutex<watch::Receiver<u64>>,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn AuthProvider>, timeout: Duration) -> Self {
        let generation = provider.session_generation();
        Self {
            provider,
            timeout,
            cached: Mutex::new(None),
            generation: Mutex::new(generation),
        }
    }

    /// `Ok(None)` means anonymous: reads work, writes do not. Only a
    /// provider that hangs past the timeout is an error.
    pub async fn current_identity(&self) -> Result<Option<Identity>, CoordinationError> {
        self.invalidate_if_session_changed();
        if let Some(identity) = self.cached_identity() {
            return Ok(Some(identity));
        }

        let identity = tokio::time::timeout(self.timeout, self.fetch_identity())
            .await
            .map_err(|_| CoordinationError::Timeout {
                operation: "current_identity",
            })?;

        if let Some(identity) = identity.as_ref() {
            tracing::info!(
                code = AUTH_IDENTITY_RESOLVED,
                identity_id = %identity.id,
                "caller identity resolved"
            );
            if let Ok(mut cached) = self.cached.lock() {
                *cached = Some(identity.clone());
            }
        }

        Ok(identity)
    }

    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn cached_identity(&self) -> Option<Identity> {
        self.cached.lock().ok().and_then(|cached| cached.clone())
    }

    fn invalidate_if_session_changed(&self) {
        let changed = self
            .generation
            .lock()
            .map(|mut generation| {
                let changed = generation.has_changed().unwrap_or(false);
                if changed {
                    generation.borrow_and_update();
                }
                changed
            })
            .unwrap_or(false);

        if changed {
            tracing::info!(code = AUTH_SESSION_CHANGED, "auth session changed, identity dropped");
            self.invalidate();
        }
    }

    async fn fetch_identity(&self) -> Option<Identity> {
        let user = match self.provider.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) | Err(AuthError::NotAuthenticated) => return None,
            Err(error) => {
                tracing::warn!(
                    code = AUTH_PROVIDER_UNAVAILABLE,
                    error = %error,
                    "auth provider failed, continuing anonymously"
                );
                return None;
            }
        };

        let profile = match self.provider.profile(&user.id).await {
            Ok(profile) => profile.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    code = AUTH_PROVIDER_UNAVAILABLE,
                    error = %error,
                    "profile lookup failed, using fallback name"
                );
                Profile::default()
            }
        };

        Some(identity_from(user, profile))
    }
}

fn identity_from(user: AuthUser, profile: Profile) -> Identity {
    let display_name = profile
        .display_name
        .map(|name| sanitize_display_name(&name))
        .filter(|name| !name.is_empty())
        .or_else(|| {
            user.email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .map(sanitize_display_name)
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_owned());

    Identity {
        id: user.id,
        display_name,
        avatar_ref: profile.avatar_ref,
    }
}
