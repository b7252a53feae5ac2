use std::path::PathBuf;

use serde::Deserialize;

use crate::infra::config::{AppConfig, LogConfig, PresenceConfig, RateLimitConfig, SyncConfig};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub rate_limit: Option<FileRateLimitConfig>,
    pub presence: Option<FilePresenceConfig>,
    pub sync: Option<FileSyncConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(rate_limit) = self.rate_limit {
            rate_limit.merge_into(&mut config.rate_limit);
        }

        if let Some(presence) = self.presence {
            presence.merge_into(&mut config.presence);
        }

        if let Some(sync) = self.sync {
            sync.merge_into(&mut config.sync);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }

        if let Some(file) = self.file {
            config.file = Some(file);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRateLimitConfig {
    pub max_messages_per_window: Option<u32>,
    pub window_secs: Option<u64>,
    pub min_interval_ms: Option<u64>,
}

impl FileRateLimitConfig {
    fn merge_into(self, config: &mut RateLimitConfig) {
        if let Some(max) = self.max_messages_per_window {
            config.max_messages_per_window = max;
        }

        if let Some(window_secs) = self.window_secs {
            config.window_secs = window_secs;
        }

        if let Some(min_interval_ms) = self.min_interval_ms {
            config.min_interval_ms = min_interval_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FilePresenceConfig {
    pub online_threshold_mins: Option<u64>,
    pub typing_ttl_ms: Option<u64>,
}

impl FilePresenceConfig {
    fn merge_into(self, config: &mut PresenceConfig) {
        if let Some(mins) = self.online_threshold_mins {
            config.online_threshold_mins = mins;
        }

        if let Some(ttl_ms) = self.typing_ttl_ms {
            config.typing_ttl_ms = ttl_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSyncConfig {
    pub resync_window: Option<usize>,
    pub operation_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
}

impl FileSyncConfig {
    fn merge_into(self, config: &mut SyncConfig) {
        if let Some(window) = self.resync_window {
            config.resync_window = window;
        }

        if let Some(timeout_ms) = self.operation_timeout_ms {
            config.operation_timeout_ms = timeout_ms;
        }

        if let Some(delay_ms) = self.reconnect_delay_ms {
            config.reconnect_delay_ms = delay_ms;
        }

        if let Some(attempts) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = attempts;
        }
    }
}
