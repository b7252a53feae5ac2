//! Process-local implementation of the store contract. Backs the CLI demo
//! and the async tests; supports fault injection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    domain::{
        clock::Clock,
        events::StreamKind,
        member::Member,
        message::{Message, Reaction},
        session::Session,
        venue_event::VenueEvent,
    },
    usecases::{
        contracts::{
            ChangeOp, ChatStore, MemberUpsert, NewMessage, NewReaction, StoreNotification,
            SubscriptionFilter, TypingBroadcast,
        },
        error::StoreError,
    },
};

type Subscribers = HashMap<(String, StreamKind), Vec<mpsc::UnboundedSender<StoreNotification>>>;

#[derive(Debug)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<Session>,
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    members: Vec<Member>,
    events: Vec<VenueEvent>,
    subscribers: Subscribers,
    last_created_at: Option<DateTime<Utc>>,
    fail_next_write: Option<StoreError>,
    refuse_subscriptions: bool,
    lookup_delay: Option<Duration>,
    message_write_delay: Option<Duration>,
    lookups: usize,
    subscribe_calls: usize,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn add_session(&self, session: Session) {
        self.lock().sessions.push(session);
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Next write of any kind fails with `error`.
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().fail_next_write = Some(error);
    }

    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.lock().refuse_subscriptions = refuse;
    }

    pub fn set_lookup_delay(&self, delay: Option<Duration>) {
        self.lock().lookup_delay = delay;
    }

    /// Holds every message insert for `delay` before it is acked.
    pub fn set_message_write_delay(&self, delay: Option<Duration>) {
        self.lock().message_write_delay = delay;
    }

    pub fn lookup_count(&self) -> usize {
        self.lock().lookups
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Closes every open notification stream of a session, as a dropped
    /// socket would.
    pub fn drop_subscriptions(&self, session_id: &str) {
        self.lock()
            .subscribers
            .retain(|(session, _), _| session != session_id);
    }

    pub fn live_subscribers(&self, session_id: &str, stream: StreamKind) -> usize {
        self.lock()
            .subscribers
            .get(&(session_id.to_owned(), stream))
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn messages_in(&self, session_id: &str) -> Vec<Message> {
        let state = self.lock();
        state.ordered_messages(session_id)
    }

    pub fn reactions_on(&self, message_id: &str) -> Vec<Reaction> {
        self.lock()
            .reactions
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect()
    }

    pub fn member(&self, session_id: &str, identity_id: &str) -> Option<Member> {
        self.lock()
            .members
            .iter()
            .find(|m| m.session_id == session_id && m.identity_id == identity_id)
            .cloned()
    }

    /// Moderation action taken outside this core.
    pub fn flag_message(&self, message_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(StoreError::NotFound)?;
        message.flagged = true;
        let message = message.clone();
        state.notify::<_, Message>(
            &message.session_id,
            StreamKind::Messages,
            ChangeOp::Update,
            &message,
            None,
        );
        Ok(())
    }

    pub fn put_event(&self, event: VenueEvent) {
        let mut state = self.lock();
        let op = match state.events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => {
                *existing = event.clone();
                ChangeOp::Update
            }
            None => {
                state.events.push(event.clone());
                ChangeOp::Insert
            }
        };
        state.notify::<_, VenueEvent>(&event.session_id, StreamKind::Events, op, &event, None);
    }

    pub fn delete_event(&self, event_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let index = state
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or(StoreError::NotFound)?;
        let removed = state.events.remove(index);
        state.notify(
            &removed.session_id,
            StreamKind::Events,
            ChangeOp::Delete,
            &json!({ "id": removed.id }),
            Some(&removed),
        );
        Ok(())
    }

    /// Pushes a raw notification to every subscriber of a stream.
    pub fn push_raw(&self, session_id: &str, notification: StoreNotification) {
        let mut state = self.lock();
        state.send(session_id, notification);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(state: &mut MemoryState) -> Result<(), StoreError> {
        match state.fail_next_write.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl MemoryState {
    fn ordered_messages(&self, session_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        messages
    }

    /// Strictly increasing insert timestamps, so rows written within one
    /// clock tick keep their insertion order.
    fn next_created_at(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = match self.last_created_at {
            Some(last) if last >= now => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(at);
        at
    }

    fn notify<T: Serialize, O: Serialize>(
        &mut self,
        session_id: &str,
        stream: StreamKind,
        op: ChangeOp,
        record: &T,
        old: Option<&O>,
    ) {
        let (Ok(record), Ok(old)) = (
            serde_json::to_value(record),
            old.map(serde_json::to_value).transpose(),
        ) else {
            tracing::warn!(
                code = "WOLFPACK_MEMORY_STORE_ENCODE_FAILED",
                stream = stream.as_label(),
                "dropping notification that failed to encode"
            );
            return;
        };

        self.send(
            session_id,
            StoreNotification {
                stream,
                op,
                record,
                old,
            },
        );
    }

    fn send(&mut self, session_id: &str, notification: StoreNotification) {
        if let Some(subscribers) = self
            .subscribers
            .get_mut(&(session_id.to_owned(), notification.stream))
        {
            subscribers.retain(|sub| sub.send(notification.clone()).is_ok());
        }
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_session(&self, handle: &str) -> Result<Option<Session>, StoreError> {
        let delay = {
            let mut state = self.lock();
            state.lookups += 1;
            state.lookup_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .lock()
            .sessions
            .iter()
            .find(|s| {
                s.handle
                    .as_deref()
                    .is_some_and(|h| h.eq_ignore_ascii_case(handle))
            })
            .cloned())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let delay = self.lock().message_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let now = self.clock.now();
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let created_at = state.next_created_at(now);
        let row = Message {
            id: Uuid::new_v4().to_string(),
            session_id: message.session_id,
            author_id: message.author_id,
            display_name: message.display_name,
            avatar_ref: message.avatar_ref,
            content: message.content,
            kind: message.kind,
            image_ref: message.image_ref,
            created_at,
            edited_at: None,
            flagged: false,
            nonce: Some(message.nonce),
            reactions: Vec::new(),
        };
        state.messages.push(row.clone());
        state.notify::<_, Message>(
            &row.session_id,
            StreamKind::Messages,
            ChangeOp::Insert,
            &row,
            None,
        );
        Ok(row)
    }

    async fn insert_reaction(&self, reaction: NewReaction) -> Result<Reaction, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        if !state.messages.iter().any(|m| m.id == reaction.message_id) {
            return Err(StoreError::NotFound);
        }
        if state.reactions.iter().any(|r| {
            r.message_id == reaction.message_id
                && r.author_id == reaction.author_id
                && r.emoji == reaction.emoji
        }) {
            return Err(StoreError::Conflict);
        }

        let row = Reaction {
            id: Uuid::new_v4().to_string(),
            message_id: reaction.message_id,
            author_id: reaction.author_id,
            emoji: reaction.emoji,
            created_at: now,
        };
        state.reactions.push(row.clone());
        state.notify::<_, Reaction>(
            &reaction.session_id,
            StreamKind::Reactions,
            ChangeOp::Insert,
            &row,
            None,
        );
        Ok(row)
    }

    async fn delete_reaction(&self, reaction_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let index = state
            .reactions
            .iter()
            .position(|r| r.id == reaction_id)
            .ok_or(StoreError::NotFound)?;
        let removed = state.reactions.remove(index);
        let session_id = state
            .messages
            .iter()
            .find(|m| m.id == removed.message_id)
            .map(|m| m.session_id.clone())
            .unwrap_or_default();
        state.notify(
            &session_id,
            StreamKind::Reactions,
            ChangeOp::Delete,
            &json!({ "id": removed.id }),
            Some(&removed),
        );
        Ok(())
    }

    async fn upsert_member(&self, member: MemberUpsert) -> Result<Member, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let existing = state
            .members
            .iter_mut()
            .find(|m| m.session_id == member.session_id && m.identity_id == member.identity_id);

        let (row, op) = match existing {
            Some(row) => {
                row.display_name = member.display_name;
                row.avatar_ref = member.avatar_ref;
                row.last_active_at = now;
                row.is_active = true;
                (row.clone(), ChangeOp::Update)
            }
            None => {
                let row = Member {
                    identity_id: member.identity_id,
                    session_id: member.session_id,
                    display_name: member.display_name,
                    avatar_ref: member.avatar_ref,
                    joined_at: now,
                    last_active_at: now,
                    is_active: true,
                    is_online: false,
                };
                state.members.push(row.clone());
                (row, ChangeOp::Insert)
            }
        };

        state.notify::<_, Member>(&row.session_id, StreamKind::Members, op, &row, None);
        Ok(row)
    }

    async fn mark_member_left(
        &self,
        session_id: &str,
        identity_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let row = state
            .members
            .iter_mut()
            .find(|m| m.session_id == session_id && m.identity_id == identity_id)
            .ok_or(StoreError::NotFound)?;
        row.is_active = false;
        let row = row.clone();
        state.notify::<_, Member>(session_id, StreamKind::Members, ChangeOp::Update, &row, None);
        Ok(())
    }

    async fn touch_member(
        &self,
        session_id: &str,
        identity_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let row = state
            .members
            .iter_mut()
            .find(|m| m.session_id == session_id && m.identity_id == identity_id && m.is_active)
            .ok_or(StoreError::NotFound)?;
        row.last_active_at = at;
        let row = row.clone();
        state.notify::<_, Member>(session_id, StreamKind::Members, ChangeOp::Update, &row, None);
        Ok(())
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.lock();
        let mut messages = state.ordered_messages(session_id);
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);

        for message in &mut messages {
            message.reactions = state
                .reactions
                .iter()
                .filter(|r| r.message_id == message.id)
                .cloned()
                .collect();
        }
        Ok(messages)
    }

    async fn active_members(&self, session_id: &str) -> Result<Vec<Member>, StoreError> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| m.session_id == session_id && m.is_active)
            .cloned()
            .collect())
    }

    async fn venue_events(&self, session_id: &str) -> Result<Vec<VenueEvent>, StoreError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn publish_typing(&self, signal: TypingBroadcast) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let op = if signal.typing {
            ChangeOp::Insert
        } else {
            ChangeOp::Delete
        };
        let record = json!({
            "identity_id": signal.identity_id,
            "display_name": signal.display_name,
        });
        state.notify::<_, ()>(&signal.session_id, StreamKind::Typing, op, &record, None);
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> Result<mpsc::UnboundedReceiver<StoreNotification>, StoreError> {
        let mut state = self.lock();
        state.subscribe_calls += 1;
        if state.refuse_subscriptions {
            return Err(StoreError::Unavailable("subscriptions refused".to_owned()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry((filter.session_id, filter.stream))
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
