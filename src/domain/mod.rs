//! Domain layer: core entities and business rules.

pub mod clock;
pub mod events;
pub mod member;
pub mod message;
pub mod message_store;
pub mod presence;
pub mod rate_limit;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod validation;
pub mod venue_event;

/// Returns the domain module name for smoke checks.
pub fn module_name() -> &'static str {
    "domain"
}
