use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_per_window: u32,
    pub window: Duration,
    pub min_interval: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            window: Duration::seconds(60),
            min_interval: Duration::milliseconds(1_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WindowState {
    window_start: DateTime<Utc>,
    count_in_window: u32,
    last_accepted_at: Option<DateTime<Utc>>,
    /// Start times of sends that passed the check but are not acked yet.
    in_flight: Vec<DateTime<Utc>>,
}

impl WindowState {
    fn opened_at(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count_in_window: 0,
            last_accepted_at: None,
            in_flight: Vec::new(),
        }
    }

    fn last_send(&self) -> Option<DateTime<Utc>> {
        self.in_flight
            .iter()
            .copied()
            .chain(self.last_accepted_at)
            .max()
    }
}

/// Outcome of a limiter check. `Denied` carries how long until a send
/// could be accepted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Per-identity send throttle. Windows reset lazily on the next check;
/// nothing runs in the background.
///
/// Sends still waiting on the store hold a reservation that counts like an
/// accepted send, so concurrent callers cannot slip past the gap or the
/// window cap. A released reservation leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    identities: HashMap<String, WindowState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            identities: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Side-effect free check.
    pub fn can_send(&self, identity_id: &str, now: DateTime<Utc>) -> bool {
        matches!(self.check(identity_id, now), RateDecision::Allowed)
    }

    pub fn check(&self, identity_id: &str, now: DateTime<Utc>) -> RateDecision {
        let Some(state) = self.identities.get(identity_id) else {
            return RateDecision::Allowed;
        };

        if let Some(last) = state.last_send() {
            let since_last = now - last;
            if since_last < self.policy.min_interval {
                return RateDecision::Denied {
                    retry_after: self.policy.min_interval - since_last,
                };
            }
        }

        let window_elapsed = now - state.window_start;
        let window_open = window_elapsed < self.policy.window;
        let committed = if window_open { state.count_in_window } else { 0 };
        let in_flight = u32::try_from(state.in_flight.len()).unwrap_or(u32::MAX);

        if committed.saturating_add(in_flight) >= self.policy.max_per_window {
            let retry_after = if window_open {
                self.policy.window - window_elapsed
            } else {
                self.policy.min_interval
            };
            return RateDecision::Denied { retry_after };
        }

        RateDecision::Allowed
    }

    /// Checks and, when allowed, holds a slot stamped `now` until
    /// `commit` or `release` is called with the same stamp.
    pub fn reserve(&mut self, identity_id: &str, now: DateTime<Utc>) -> RateDecision {
        let decision = self.check(identity_id, now);
        if decision == RateDecision::Allowed {
            self.identities
                .entry(identity_id.to_owned())
                .or_insert_with(|| WindowState::opened_at(now))
                .in_flight
                .push(now);
        }
        decision
    }

    /// Turns a reservation into an accepted send at `acked_at`.
    pub fn commit(&mut self, identity_id: &str, reserved_at: DateTime<Utc>, acked_at: DateTime<Utc>) {
        self.take_reservation(identity_id, reserved_at);
        self.record_send(identity_id, acked_at);
    }

    /// Drops a reservation whose write failed. Quota is not consumed.
    pub fn release(&mut self, identity_id: &str, reserved_at: DateTime<Utc>) {
        self.take_reservation(identity_id, reserved_at);
        let unused = self
            .identities
            .get(identity_id)
            .is_some_and(|state| state.last_accepted_at.is_none() && state.in_flight.is_empty());
        if unused {
            self.identities.remove(identity_id);
        }
    }

    /// Records a send the store confirmed. Call only after success.
    pub fn record_send(&mut self, identity_id: &str, now: DateTime<Utc>) {
        let window = self.policy.window;
        let state = self
            .identities
            .entry(identity_id.to_owned())
            .or_insert_with(|| WindowState::opened_at(now));

        if now - state.window_start >= window {
            state.window_start = now;
            state.count_in_window = 0;
        }

        state.count_in_window = state.count_in_window.saturating_add(1);
        state.last_accepted_at = Some(now);
    }

    fn take_reservation(&mut self, identity_id: &str, reserved_at: DateTime<Utc>) {
        let Some(state) = self.identities.get_mut(identity_id) else {
            return;
        };
        if let Some(index) = state.in_flight.iter().position(|at| *at == reserved_at) {
            state.in_flight.swap_remove(index);
        }
    }
}
