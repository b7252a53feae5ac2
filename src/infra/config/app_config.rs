use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        message_store::DEFAULT_RESYNC_WINDOW,
        presence::{DEFAULT_ONLINE_THRESHOLD_MINS, DEFAULT_TYPING_TTL_MS},
        rate_limit::RateLimitPolicy,
    },
    usecases::context::CoreConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub rate_limit: RateLimitConfig,
    pub presence: PresenceConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Projects the file-level settings into what the engine consumes.
    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            rate_limit: RateLimitPolicy {
                max_per_window: self.rate_limit.max_messages_per_window,
                window: chrono::Duration::seconds(to_i64(self.rate_limit.window_secs)),
                min_interval: chrono::Duration::milliseconds(to_i64(
                    self.rate_limit.min_interval_ms,
                )),
            },
            online_threshold: chrono::Duration::minutes(to_i64(
                self.presence.online_threshold_mins,
            )),
            typing_ttl: chrono::Duration::milliseconds(to_i64(self.presence.typing_ttl_ms)),
            resync_window: self.sync.resync_window,
            operation_timeout: Duration::from_millis(self.sync.operation_timeout_ms),
            reconnect_delay: Duration::from_millis(self.sync.reconnect_delay_ms),
            max_reconnect_attempts: self.sync.max_reconnect_attempts,
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX / 1_000_000)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_messages_per_window: u32,
    pub window_secs: u64,
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages_per_window: 10,
            window_secs: 60,
            min_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceConfig {
    pub online_threshold_mins: u64,
    pub typing_ttl_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_threshold_mins: DEFAULT_ONLINE_THRESHOLD_MINS.unsigned_abs(),
            typing_ttl_ms: DEFAULT_TYPING_TTL_MS.unsigned_abs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub resync_window: usize,
    pub operation_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_window: DEFAULT_RESYNC_WINDOW,
            operation_timeout_ms: 10_000,
            reconnect_delay_ms: 500,
            max_reconnect_attempts: 10,
        }
    }
}
