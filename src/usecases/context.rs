use std::{sync::Arc, time::Duration};

use crate::{
    domain::{
        clock::Clock,
        message_store::DEFAULT_RESYNC_WINDOW,
        presence::{DEFAULT_ONLINE_THRESHOLD_MINS, DEFAULT_TYPING_TTL_MS},
        rate_limit::RateLimitPolicy,
    },
    infra::{config::AppConfig, memory_store::MemoryStore},
};

/// Tunables the coordination engine reads. Built from `AppConfig::core()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub rate_limit: RateLimitPolicy,
    pub online_threshold: chrono::Duration,
    pub typing_ttl: chrono::Duration,
    pub resync_window: usize,
    pub operation_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitPolicy::default(),
            online_threshold: chrono::Duration::minutes(DEFAULT_ONLINE_THRESHOLD_MINS),
            typing_ttl: chrono::Duration::milliseconds(DEFAULT_TYPING_TTL_MS),
            resync_window: DEFAULT_RESYNC_WINDOW,
            operation_timeout: Duration::from_millis(10_000),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_attempts: 10,
        }
    }
}

/// Everything the binary wires together at startup.
#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<MemoryStore>,
}

impl AppContext {
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
        Self {
            config,
            clock,
            store,
        }
    }
}
