//! Realtime coordination core for venue chat and presence sessions.
//!
//! Layers: `domain` (pure state and rules), `usecases` (workflows and the
//! `coordinator` facade), `realtime` (change-feed decoding and channel
//! multiplexing), `infra` (config, logging, adapters).

pub mod app;
pub mod cli;
pub mod domain;
pub mod infra;
pub mod realtime;
#[cfg(test)]
mod test_support;
pub mod usecases;
