//! Realtime layer: store change feeds decoded into domain events and
//! multiplexed per session.

pub mod decode;
pub mod subscriptions;

/// Returns the realtime module name for smoke checks.
pub fn module_name() -> &'static str {
    "realtime"
}
