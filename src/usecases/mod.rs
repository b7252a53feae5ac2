//! Use case layer: session workflows and the coordination facade.

pub mod auth_gate;
pub mod bootstrap;
pub mod context;
pub mod contracts;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod reactions;
pub mod resolve_session;
pub mod resync;
pub mod send_message;

/// Returns the usecases module name for smoke checks.
pub fn module_name() -> &'static str {
    "usecases"
}
