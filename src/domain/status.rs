use chrono::{DateTime, Utc};

/// Lifecycle of one session facade.
///
/// `Resolving -> Connecting -> Connected <-> Reconnecting -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Resolving,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl SessionPhase {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Resolving => "SESSION_RESOLVING",
            Self::Connecting => "SESSION_CONNECTING",
            Self::Connected => "SESSION_CONNECTED",
            Self::Reconnecting => "SESSION_RECONNECTING",
            Self::Closed => "SESSION_CLOSED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether moving to `next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Resolving, Connecting)
            | (Connecting, Connected)
            | (Connected, Reconnecting)
            | (Reconnecting, Connected) => true,
            (current, next) => current == next,
        }
    }
}

/// Overall channel health as shown next to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityHealth {
    #[default]
    Unknown,
    Ok,
    Degraded,
    Unavailable,
}

impl ConnectivityHealth {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Unknown => "CONNECTIVITY_UNKNOWN",
            Self::Ok => "CONNECTIVITY_OK",
            Self::Degraded => "CONNECTIVITY_DEGRADED",
            Self::Unavailable => "CONNECTIVITY_UNAVAILABLE",
        }
    }

    /// Folds per-channel flags into one health value.
    pub fn from_channels(connected: &[bool]) -> Self {
        if connected.is_empty() {
            return Self::Unknown;
        }

        let up = connected.iter().filter(|c| **c).count();
        match up {
            0 => Self::Unavailable,
            n if n == connected.len() => Self::Ok,
            _ => Self::Degraded,
        }
    }
}

/// Last error surfaced to the UI until `clear_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}
