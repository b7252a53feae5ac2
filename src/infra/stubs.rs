use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::usecases::{
    contracts::{AuthProvider, AuthUser, Profile},
    error::AuthError,
};

/// Auth boundary backed by a fixed user. Used by the CLI (which trusts the
/// local terminal) and by tests.
#[derive(Debug)]
pub struct StaticAuthProvider {
    state: Mutex<StaticAuthState>,
    generation_tx: watch::Sender<u64>,
}

#[derive(Debug, Clone, Default)]
struct StaticAuthState {
    user: Option<AuthUser>,
    profile: Option<Profile>,
    unavailable: bool,
}

impl StaticAuthProvider {
    pub fn anonymous() -> Self {
        Self::with_state(StaticAuthState::default())
    }

    pub fn signed_in(id: &str, email: Option<&str>, display_name: Option<&str>) -> Self {
        Self::with_state(StaticAuthState {
            user: Some(AuthUser {
                id: id.to_owned(),
                email: email.map(str::to_owned),
            }),
            profile: Some(Profile {
                display_name: display_name.map(str::to_owned),
                avatar_ref: None,
            }),
            unavailable: false,
        })
    }

    fn with_state(state: StaticAuthState) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(state),
            generation_tx,
        }
    }

    /// Drops the credential and notifies watchers.
    pub fn sign_out(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.user = None;
            state.profile = None;
        }
        self.bump_generation();
    }

    pub fn set_profile(&self, profile: Option<Profile>) {
        if let Ok(mut state) = self.state.lock() {
            state.profile = profile;
        }
        self.bump_generation();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    fn snapshot(&self) -> StaticAuthState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    fn bump_generation(&self) {
        self.generation_tx.send_modify(|generation| *generation += 1);
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn current_user(&self) -> Result<Option<AuthUser>, AuthError> {
        let state = self.snapshot();
        if state.unavailable {
            return Err(AuthError::Unavailable("auth service offline".to_owned()));
        }
        Ok(state.user)
    }

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        let state = self.snapshot();
        match state.user {
            Some(user) if user.id == user_id => Ok(state.profile),
            _ => Ok(None),
        }
    }

    fn session_generation(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}
