use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::member::{Member, TypingSignal};

pub const DEFAULT_ONLINE_THRESHOLD_MINS: i64 = 30;
pub const DEFAULT_TYPING_TTL_MS: i64 = 3_000;

/// Roster plus typing markers for one session. Online state and typing
/// expiry are computed against the `now` passed in by the caller.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    roster: HashMap<String, Member>,
    typing: HashMap<String, TypingSignal>,
    online_threshold: Duration,
    typing_ttl: Duration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(
            Duration::minutes(DEFAULT_ONLINE_THRESHOLD_MINS),
            Duration::milliseconds(DEFAULT_TYPING_TTL_MS),
        )
    }
}

impl PresenceTracker {
    pub fn new(online_threshold: Duration, typing_ttl: Duration) -> Self {
        Self {
            roster: HashMap::new(),
            typing: HashMap::new(),
            online_threshold,
            typing_ttl,
        }
    }

    pub fn typing_ttl(&self) -> Duration {
        self.typing_ttl
    }

    /// Joined or updated member. Later `last_active_at` wins when the same
    /// row arrives twice out of order.
    pub fn upsert(&mut self, member: Member) {
        match self.roster.get_mut(&member.identity_id) {
            Some(existing) if existing.last_active_at > member.last_active_at && member.is_active => {
                existing.display_name = member.display_name;
                existing.avatar_ref = member.avatar_ref;
                existing.is_active = true;
            }
            _ => {
                self.roster.insert(member.identity_id.clone(), member);
            }
        }
    }

    pub fn mark_left(&mut self, identity_id: &str) -> bool {
        self.typing.remove(identity_id);
        match self.roster.get_mut(identity_id) {
            Some(member) if member.is_active => {
                member.is_active = false;
                true
            }
            _ => false,
        }
    }

    pub fn replace_roster(&mut self, members: Vec<Member>) {
        self.roster = members
            .into_iter()
            .map(|m| (m.identity_id.clone(), m))
            .collect();
        self.typing
            .retain(|identity_id, _| self.roster.get(identity_id).is_some_and(|m| m.is_active));
    }

    pub fn is_active_member(&self, identity_id: &str) -> bool {
        self.roster
            .get(identity_id)
            .is_some_and(|member| member.is_active)
    }

    /// Active members ordered by join time, with `is_online` filled in.
    pub fn roster(&self, now: DateTime<Utc>) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .roster
            .values()
            .filter(|member| member.is_active)
            .map(|member| {
                let mut member = member.clone();
                member.is_online = member.online_at(now, self.online_threshold);
                member
            })
            .collect();
        members.sort_by(|a, b| {
            (a.joined_at, &a.identity_id).cmp(&(b.joined_at, &b.identity_id))
        });
        members
    }

    pub fn online_count(&self, now: DateTime<Utc>) -> usize {
        self.roster
            .values()
            .filter(|member| member.online_at(now, self.online_threshold))
            .count()
    }

    pub fn typing_started(
        &mut self,
        identity_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let expires_at = now + self.typing_ttl;
        self.typing.insert(
            identity_id.to_owned(),
            TypingSignal {
                identity_id: identity_id.to_owned(),
                display_name: display_name.to_owned(),
                expires_at,
            },
        );
        expires_at
    }

    pub fn typing_stopped(&mut self, identity_id: &str) -> bool {
        self.typing.remove(identity_id).is_some()
    }

    /// Live typing markers, excluding `viewer` so nobody sees themselves.
    pub fn typing(&self, now: DateTime<Utc>, viewer: Option<&str>) -> Vec<TypingSignal> {
        let mut signals: Vec<TypingSignal> = self
            .typing
            .values()
            .filter(|signal| signal.expires_at > now)
            .filter(|signal| Some(signal.identity_id.as_str()) != viewer)
            .cloned()
            .collect();
        signals.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        signals
    }

    /// Drops expired markers. Returns how many were removed.
    pub fn expire_typing(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.typing.len();
        self.typing.retain(|_, signal| signal.expires_at > now);
        before - self.typing.len()
    }

    pub fn clear_typing(&mut self) {
        self.typing.clear();
    }

    pub fn next_typing_expiry(&self) -> Option<DateTime<Utc>> {
        self.typing.values().map(|signal| signal.expires_at).min()
    }

    pub fn clear(&mut self) {
        self.roster.clear();
        self.typing.clear();
    }
}
