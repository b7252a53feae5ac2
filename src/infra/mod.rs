//! Infrastructure layer: config, logging, redaction and the in-memory
//! store and auth adapters.

pub mod config;
pub mod error;
pub mod logging;
pub mod memory_store;
pub mod secrets;
pub mod stubs;

/// Returns the infra module name for smoke checks.
pub fn module_name() -> &'static str {
    "infra"
}
