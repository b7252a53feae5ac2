use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something happening at the venue (DJ set, trivia, contest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueEvent {
    pub id: String,
    pub session_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Read-only board of venue events, kept current from the event stream.
#[derive(Debug, Clone, Default)]
pub struct EventBoard {
    events: HashMap<String, VenueEvent>,
}

impl EventBoard {
    pub fn upsert(&mut self, event: VenueEvent) {
        self.events.insert(event.id.clone(), event);
    }

    pub fn remove(&mut self, event_id: &str) -> bool {
        self.events.remove(event_id).is_some()
    }

    pub fn replace_all(&mut self, events: Vec<VenueEvent>) {
        self.events = events.into_iter().map(|e| (e.id.clone(), e)).collect();
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Events ordered by start time, id as tie-break.
    pub fn ordered(&self) -> Vec<VenueEvent> {
        let mut events: Vec<VenueEvent> = self.events.values().cloned().collect();
        events.sort_by(|a, b| (a.starts_at, &a.id).cmp(&(b.starts_at, &b.id)));
        events
    }
}
