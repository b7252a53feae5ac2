//! Public entry point. A `Coordinator` holds the shared collaborators; each
//! `SessionFacade` it opens owns the state of one session and walks the
//! `Resolving -> Connecting -> Connected <-> Reconnecting -> Closed`
//! lifecycle.
//!
//! All per-session state sits behind one mutex that is never held across
//! an await. Server events are applied by a dispatcher task that drains
//! the session feed in receipt order; every mutation emits a snapshot to
//! registered observers.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    domain::{
        clock::Clock,
        events::{DomainEvent, StreamKind},
        member::Member,
        message::{Message, MessageDraft},
        message_store::MessageStore,
        presence::PresenceTracker,
        rate_limit::{RateDecision, RateLimiter},
        session::{Identity, Session},
        snapshot::SessionSnapshot,
        status::{ConnectivityHealth, SessionPhase, StatusError},
        validation::validate_identifier,
        venue_event::EventBoard,
    },
    infra::secrets::describe_store_cause,
    realtime::subscriptions::{FeedItem, Subscription, SubscriptionManager},
    usecases::{
        auth_gate::AuthGate,
        context::CoreConfig,
        contracts::{AuthProvider, ChatStore, TypingBroadcast},
        error::{map_store_error, store_call, CoordinationError},
        membership,
        reactions::{add_reaction, authorize_removal, prepare_reaction, remove_reaction},
        resolve_session::SessionResolver,
        resync::{fetch_window, SessionWindow},
        send_message::{pending_for, prepare_message, submit_message, SendMessageCommand},
    },
};

const SESSION_CONNECTED: &str = "WOLFPACK_SESSION_CONNECTED";
const SESSION_RECONNECTING: &str = "WOLFPACK_SESSION_RECONNECTING";
const SESSION_CLOSED: &str = "WOLFPACK_SESSION_CLOSED";
const RECONNECT_FAILED: &str = "WOLFPACK_RECONNECT_FAILED";
const RECONNECT_EXHAUSTED: &str = "WOLFPACK_RECONNECT_EXHAUSTED";
const RESYNC_FAILED: &str = "WOLFPACK_RESYNC_FAILED";
const STORE_WRITE_FAILED: &str = "WOLFPACK_STORE_WRITE_FAILED";
const FEED_LAGGED: &str = "WOLFPACK_FEED_LAGGED";

const DOMAIN_EVENTS_CAPACITY: usize = 256;
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct Coordinator {
    deps: Arc<Deps>,
}

struct Deps {
    store: Arc<dyn ChatStore>,
    auth: AuthGate,
    resolver: SessionResolver,
    subscriptions: SubscriptionManager,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        auth: Arc<dyn AuthProvider>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let deps = Deps {
            auth: AuthGate::new(auth, config.operation_timeout),
            resolver: SessionResolver::new(Arc::clone(&store), config.operation_timeout),
            subscriptions: SubscriptionManager::new(Arc::clone(&store)),
            store,
            config,
            clock,
        };

        Self {
            deps: Arc::new(deps),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.deps.config
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.deps.subscriptions
    }

    /// Creates a facade in `Resolving`. Nothing touches the network until
    /// `connect` is called.
    pub fn open(&self, handle_or_id: &str) -> SessionFacade {
        let (events_tx, _) = broadcast::channel(DOMAIN_EVENTS_CAPACITY);
        let state = SessionState::new(&self.deps.config);

        SessionFacade {
            shared: Arc::new(Shared {
                input: handle_or_id.to_owned(),
                deps: Arc::clone(&self.deps),
                events_tx,
                state: Mutex::new(state),
            }),
        }
    }
}

#[derive(Clone)]
pub struct SessionFacade {
    shared: Arc<Shared>,
}

struct Shared {
    input: String,
    deps: Arc<Deps>,
    events_tx: broadcast::Sender<DomainEvent>,
    state: Mutex<SessionState>,
}

struct SessionState {
    phase: SessionPhase,
    session: Option<Session>,
    identity: Option<Identity>,
    joined: bool,
    messages: MessageStore,
    presence: PresenceTracker,
    board: EventBoard,
    limiter: RateLimiter,
    reactions_in_flight: HashSet<(String, String)>,
    error: Option<StatusError>,
    observers: Vec<mpsc::UnboundedSender<SessionSnapshot>>,
    subscription: Option<Subscription>,
    tasks: SessionTasks,
}

#[derive(Default)]
struct SessionTasks {
    dispatcher: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    resync: Option<JoinHandle<()>>,
    typing_sweep: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        for task in [
            self.dispatcher.take(),
            self.reconnect.take(),
            self.resync.take(),
            self.typing_sweep.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn is_running(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|task| !task.is_finished())
}

impl SessionState {
    fn new(config: &CoreConfig) -> Self {
        Self {
            phase: SessionPhase::Resolving,
            session: None,
            identity: None,
            joined: false,
            messages: MessageStore::new(config.resync_window),
            presence: PresenceTracker::new(config.online_threshold, config.typing_ttl),
            board: EventBoard::default(),
            limiter: RateLimiter::new(config.rate_limit),
            reactions_in_flight: HashSet::new(),
            error: None,
            observers: Vec::new(),
            subscription: None,
            tasks: SessionTasks::default(),
        }
    }

    fn set_phase(&mut self, next: SessionPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal phase change {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|session| session.id.clone())
    }

    /// Write gate: phase first, then identity.
    fn writable(&self) -> Result<(Session, Identity), CoordinationError> {
        match self.phase {
            SessionPhase::Connected => {}
            SessionPhase::Reconnecting => return Err(CoordinationError::Disconnected),
            phase => return Err(CoordinationError::InvalidState { phase }),
        }

        let session = self
            .session
            .clone()
            .ok_or(CoordinationError::InvalidState { phase: self.phase })?;
        let identity = self
            .identity
            .clone()
            .ok_or(CoordinationError::AuthenticationRequired)?;
        Ok((session, identity))
    }

    fn record_error(&mut self, error: &CoordinationError, at: DateTime<Utc>) {
        self.error = Some(StatusError {
            code: error.code().to_owned(),
            message: error.to_string(),
            at,
        });
    }

    fn apply_window(&mut self, window: SessionWindow) {
        self.messages.resync(window.messages);
        self.presence.replace_roster(window.members);
        self.board.replace_all(window.events);
        if let Some(identity) = self.identity.as_ref() {
            self.joined = self.presence.is_active_member(&identity.id);
        }
    }

    /// Returns false once the session is closed; nothing is applied then.
    fn apply(&mut self, event: &DomainEvent, now: DateTime<Utc>) -> bool {
        if self.phase.is_terminal() {
            return false;
        }

        let own_id = self.identity.as_ref().map(|identity| identity.id.clone());
        let is_own = |identity_id: &str| own_id.as_deref() == Some(identity_id);

        match event {
            DomainEvent::MessageCreated(message) => {
                self.messages.append(message.clone());
            }
            DomainEvent::MessageUpdated(message) => {
                self.messages.update(message.clone());
            }
            DomainEvent::ReactionAdded(reaction) => {
                self.messages.apply_reaction(reaction.clone());
            }
            DomainEvent::ReactionRemoved { reaction_id, .. } => {
                self.messages.remove_reaction(reaction_id);
            }
            DomainEvent::MemberJoined(member) | DomainEvent::MemberUpdated(member) => {
                if is_own(&member.identity_id) && member.is_active {
                    self.joined = true;
                }
                self.presence.upsert(member.clone());
            }
            DomainEvent::MemberLeft { identity_id } => {
                if is_own(identity_id) {
                    self.joined = false;
                }
                self.presence.mark_left(identity_id);
            }
            DomainEvent::EventCreated(venue_event) | DomainEvent::EventUpdated(venue_event) => {
                self.board.upsert(venue_event.clone());
            }
            DomainEvent::EventDeleted { event_id } => {
                self.board.remove(event_id);
            }
            DomainEvent::TypingStarted {
                identity_id,
                display_name,
            } => {
                if !is_own(identity_id) {
                    self.presence.typing_started(identity_id, display_name, now);
                }
            }
            DomainEvent::TypingStopped { identity_id } => {
                self.presence.typing_stopped(identity_id);
            }
        }

        true
    }

    /// Local half of `leave_session`: nothing here awaits.
    fn teardown(&mut self) {
        self.set_phase(SessionPhase::Closed);
        self.subscription = None;
        self.tasks.abort_all();
        self.messages.discard_pending();
        self.reactions_in_flight.clear();
        self.presence.clear_typing();
    }

    fn snapshot(
        &self,
        now: DateTime<Utc>,
        subscriptions: &SubscriptionManager,
    ) -> SessionSnapshot {
        let channels = match (self.session.as_ref(), self.subscription.is_some()) {
            (Some(session), true) => subscriptions.channel_states(&session.id),
            _ => Vec::new(),
        };
        let connectivity = if self.phase.is_terminal() {
            ConnectivityHealth::Unavailable
        } else {
            let flags: Vec<bool> = channels.iter().map(|(_, connected)| *connected).collect();
            ConnectivityHealth::from_channels(&flags)
        };
        let viewer = self.identity.as_ref().map(|identity| identity.id.as_str());

        SessionSnapshot {
            phase: self.phase,
            session: self.session.clone(),
            identity: self.identity.clone(),
            messages: self.messages.messages(),
            pending: self.messages.pending().to_vec(),
            members: self.presence.roster(now),
            typing: self.presence.typing(now, viewer),
            events: self.board.ordered(),
            connectivity,
            channels,
            joined: self.joined,
            error: self.error.clone(),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` under the state lock without notifying observers.
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    /// Runs `f` under the state lock, then emits a snapshot.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.publish(&mut state);
        result
    }

    fn publish(&self, state: &mut SessionState) {
        if state.observers.is_empty() {
            return;
        }
        let snapshot = state.snapshot(self.deps.clock.now(), &self.deps.subscriptions);
        state
            .observers
            .retain(|observer| observer.send(snapshot.clone()).is_ok());
    }

    fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    fn timeout(&self) -> Duration {
        self.deps.config.operation_timeout
    }

    fn surface<T>(&self, result: Result<T, CoordinationError>) -> Result<T, CoordinationError> {
        if let Err(error) = result.as_ref() {
            let now = self.deps.clock.now();
            self.mutate(|state| state.record_error(error, now));
        }
        result
    }

    fn apply_event(self: &Arc<Self>, event: DomainEvent) {
        let now = self.deps.clock.now();
        let applied = self.mutate(|state| state.apply(&event, now));
        if !applied {
            tracing::debug!(event = event.kind_label(), "dropping event for closed session");
            return;
        }
        tracing::trace!(event = event.kind_label(), "applied server event");

        if matches!(event, DomainEvent::TypingStarted { .. }) {
            self.ensure_typing_sweep();
        }
        let _ = self.events_tx.send(event);
    }

    fn on_channel_down(self: &Arc<Self>, stream: StreamKind) {
        let reconnecting = self.mutate(|state| {
            if state.phase == SessionPhase::Connected {
                state.set_phase(SessionPhase::Reconnecting);
                let session_id = state.session_id().unwrap_or_default();
                tracing::warn!(
                    code = SESSION_RECONNECTING,
                    session_id = %session_id,
                    stream = stream.as_label(),
                    "channel lost, keeping history while reconnecting"
                );
            }
            state.phase == SessionPhase::Reconnecting
        });

        if reconnecting {
            self.ensure_reconnect();
        }
    }

    fn ensure_reconnect(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.phase != SessionPhase::Reconnecting || is_running(&state.tasks.reconnect) {
            return;
        }
        let Some(session_id) = state.session_id() else {
            return;
        };
        state.tasks.reconnect = Some(tokio::spawn(run_reconnect(
            Arc::downgrade(self),
            session_id,
        )));
    }

    fn schedule_resync(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.phase != SessionPhase::Connected || is_running(&state.tasks.resync) {
            return;
        }

        let weak = Arc::downgrade(self);
        state.tasks.resync = Some(tokio::spawn(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Err(error) = shared.resync().await {
                tracing::warn!(code = RESYNC_FAILED, error = %error, "background resync failed");
            }
        }));
    }

    fn ensure_typing_sweep(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.phase.is_terminal() || state.tasks.typing_sweep.is_some() {
            return;
        }
        state.tasks.typing_sweep = Some(tokio::spawn(run_typing_sweep(Arc::downgrade(self))));
    }

    async fn resync(&self) -> Result<(), CoordinationError> {
        let session_id = self
            .with_state(|state| state.session_id())
            .ok_or(CoordinationError::InvalidState {
                phase: self.phase(),
            })?;

        let window = fetch_window(
            &*self.deps.store,
            &session_id,
            self.deps.config.resync_window,
            self.timeout(),
        )
        .await?;

        self.mutate(|state| {
            if !state.phase.is_terminal() {
                state.apply_window(window);
            }
        });
        Ok(())
    }

    async fn try_reconnect(&self, session_id: &str) -> Result<(), CoordinationError> {
        let subscriptions = &self.deps.subscriptions;
        for (stream, connected) in subscriptions.channel_states(session_id) {
            if connected {
                continue;
            }
            let reopened = subscriptions
                .reconnect(session_id, stream)
                .await
                .map_err(map_store_error)?;
            if !reopened {
                return Err(CoordinationError::Disconnected);
            }
        }

        let identity = self.deps.auth.current_identity().await?;
        let window = fetch_window(
            &*self.deps.store,
            session_id,
            self.deps.config.resync_window,
            self.timeout(),
        )
        .await?;

        self.mutate(|state| {
            if state.phase != SessionPhase::Reconnecting {
                return;
            }
            state.identity = identity;
            state.apply_window(window);
            state.set_phase(SessionPhase::Connected);
            state.error = None;
        });
        tracing::info!(code = SESSION_CONNECTED, session_id, "session reconnected and resynced");
        Ok(())
    }
}

async fn run_dispatcher(weak: Weak<Shared>, mut feed: broadcast::Receiver<FeedItem>) {
    loop {
        let item = feed.recv().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };

        match item {
            Ok(FeedItem::Event { event, .. }) => shared.apply_event(event),
            Ok(FeedItem::ChannelDown { stream }) => shared.on_channel_down(stream),
            Ok(FeedItem::ChannelUp { .. }) => shared.mutate(|_| ()),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(code = FEED_LAGGED, skipped, "session feed lagged, resyncing");
                shared.schedule_resync();
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn run_reconnect(weak: Weak<Shared>, session_id: String) {
    let Some((delay, attempts)) = weak.upgrade().map(|shared| {
        (
            shared.deps.config.reconnect_delay,
            shared.deps.config.max_reconnect_attempts.max(1),
        )
    }) else {
        return;
    };

    for attempt in 1..=attempts {
        tokio::time::sleep(delay).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.phase() != SessionPhase::Reconnecting {
            return;
        }

        match shared.try_reconnect(&session_id).await {
            Ok(()) => return,
            Err(error) => tracing::warn!(
                code = RECONNECT_FAILED,
                session_id = %session_id,
                attempt,
                error = %error,
                "reconnect attempt failed"
            ),
        }
    }

    if let Some(shared) = weak.upgrade() {
        tracing::error!(
            code = RECONNECT_EXHAUSTED,
            session_id = %session_id,
            attempts,
            "giving up on reconnect until refresh"
        );
        let now = shared.deps.clock.now();
        shared.mutate(|state| state.record_error(&CoordinationError::Disconnected, now));
    }
}

/// One sweep per session, however many typists. Exits when nothing is
/// left to expire.
async fn run_typing_sweep(weak: Weak<Shared>) {
    loop {
        let wait = {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let now = shared.deps.clock.now();
            let mut state = shared.lock();
            if state.presence.expire_typing(now) > 0 {
                shared.publish(&mut state);
            }

            match state.presence.next_typing_expiry() {
                Some(expires_at) => (expires_at - now)
                    .to_std()
                    .unwrap_or_default()
                    .max(MIN_SWEEP_INTERVAL),
                None => {
                    state.tasks.typing_sweep = None;
                    return;
                }
            }
        };

        tokio::time::sleep(wait).await;
    }
}

impl SessionFacade {
    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock();
        state.snapshot(self.shared.deps.clock.now(), &self.shared.deps.subscriptions)
    }

    /// Registers an observer. The current snapshot is delivered first.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.lock();
        let snapshot = state.snapshot(self.shared.deps.clock.now(), &self.shared.deps.subscriptions);
        if tx.send(snapshot).is_ok() {
            state.observers.push(tx);
        }
        rx
    }

    /// Every applied server event, for an external notification dispatcher.
    pub fn domain_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Resolves the session and caller, opens all channels and loads the
    /// recent window. Retryable after `Timeout`; an unresolvable session
    /// closes the facade.
    pub async fn connect(&self) -> Result<(), CoordinationError> {
        let result = self.connect_inner().await;
        self.shared.surface(result)
    }

    async fn connect_inner(&self) -> Result<(), CoordinationError> {
        let shared = &self.shared;
        let deps = &shared.deps;

        let phase = shared.phase();
        if !matches!(phase, SessionPhase::Resolving | SessionPhase::Connecting) {
            return Err(CoordinationError::InvalidState { phase });
        }

        let session = match deps.resolver.resolve(&shared.input).await {
            Ok(session) => session,
            Err(CoordinationError::InvalidSession) => {
                shared.mutate(|state| {
                    if !state.phase.is_terminal() {
                        state.teardown();
                    }
                });
                return Err(CoordinationError::InvalidSession);
            }
            Err(error) => return Err(error),
        };
        let identity = deps.auth.current_identity().await?;

        shared.mutate(|state| {
            if state.phase.is_terminal() {
                return Err(CoordinationError::InvalidState { phase: state.phase });
            }
            state.session = Some(session.clone());
            state.identity = identity;
            state.set_phase(SessionPhase::Connecting);
            Ok(())
        })?;

        let mut subscription = deps
            .subscriptions
            .attach(&session.id, &StreamKind::ALL)
            .await
            .map_err(map_store_error)?;
        let feed = subscription.take_feed();
        let window = fetch_window(
            &*deps.store,
            &session.id,
            deps.config.resync_window,
            shared.timeout(),
        )
        .await?;

        let weak = Arc::downgrade(shared);
        shared.mutate(move |state| {
            if state.phase != SessionPhase::Connecting {
                return Err(CoordinationError::InvalidState { phase: state.phase });
            }
            state.apply_window(window);
            state.subscription = Some(subscription);
            if let Some(feed) = feed {
                state.tasks.dispatcher = Some(tokio::spawn(run_dispatcher(weak, feed)));
            }
            state.set_phase(SessionPhase::Connected);
            state.error = None;
            Ok(())
        })?;

        tracing::info!(
            code = SESSION_CONNECTED,
            session_id = %session.id,
            anonymous = self.snapshot().identity.is_none(),
            "session connected"
        );
        Ok(())
    }

    /// Posts a message. A pending copy is visible until the insert event
    /// confirms it; a failed write removes it again.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<Message, CoordinationError> {
        let result = self.send_message_inner(draft).await;
        self.shared.surface(result)
    }

    async fn send_message_inner(&self, draft: MessageDraft) -> Result<Message, CoordinationError> {
        let shared = &self.shared;
        let now = shared.deps.clock.now();

        let row = shared.mutate(|state| {
            let (session, identity) = state.writable()?;
            let row = prepare_message(SendMessageCommand {
                session_id: session.id,
                identity: identity.clone(),
                draft,
                nonce: Uuid::new_v4().to_string(),
            })?;

            if let RateDecision::Denied { retry_after } = state.limiter.reserve(&identity.id, now) {
                return Err(CoordinationError::RateLimited {
                    retry_after_ms: u64::try_from(retry_after.num_milliseconds()).unwrap_or(0),
                });
            }

            state.messages.insert_pending(pending_for(&row, now));
            Ok(row)
        })?;

        let nonce = row.nonce.clone();
        let author_id = row.author_id.clone();

        match submit_message(&*shared.deps.store, row, shared.timeout()).await {
            Ok(message) => {
                let acked_at = shared.deps.clock.now();
                shared.with_state(|state| state.limiter.commit(&author_id, now, acked_at));
                Ok(message)
            }
            Err(error) => {
                log_write_failure("send_message", &error);
                shared.mutate(|state| {
                    state.limiter.release(&author_id, now);
                    state.messages.rollback_pending(&nonce);
                });
                Err(error)
            }
        }
    }

    /// Adds a reaction. Repeating an existing or in-flight reaction is a
    /// successful no-op.
    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<(), CoordinationError> {
        let result = self.add_reaction_inner(message_id, emoji).await;
        self.shared.surface(result)
    }

    async fn add_reaction_inner(&self, message_id: &str, emoji: &str) -> Result<(), CoordinationError> {
        let shared = &self.shared;
        let key = (message_id.to_owned(), emoji.to_owned());

        let row = shared.with_state(|state| {
            let (session, identity) = state.writable()?;
            let row = prepare_reaction(&session.id, &identity, message_id, emoji)?;
            if state.messages.has_reaction(message_id, &identity.id, emoji)
                || !state.reactions_in_flight.insert(key.clone())
            {
                return Ok(None);
            }
            Ok(Some(row))
        })?;

        let Some(row) = row else {
            return Ok(());
        };

        let result = add_reaction(&*shared.deps.store, row, shared.timeout()).await;
        shared.with_state(|state| {
            state.reactions_in_flight.remove(&key);
        });

        if let Err(error) = result.as_ref() {
            log_write_failure("add_reaction", error);
        }
        result.map(|_| ())
    }

    /// Removes one of the caller's own reactions.
    pub async fn remove_reaction(&self, reaction_id: &str) -> Result<(), CoordinationError> {
        let result = self.remove_reaction_inner(reaction_id).await;
        self.shared.surface(result)
    }

    async fn remove_reaction_inner(&self, reaction_id: &str) -> Result<(), CoordinationError> {
        let shared = &self.shared;

        shared.with_state(|state| {
            let (_, identity) = state.writable()?;
            if !validate_identifier(reaction_id) {
                return Err(CoordinationError::invalid_input("reaction_id", "malformed id"));
            }
            authorize_removal(state.messages.find_reaction(reaction_id), &identity)
        })?;

        let result = remove_reaction(&*shared.deps.store, reaction_id, shared.timeout()).await;
        if let Err(error) = result.as_ref() {
            log_write_failure("remove_reaction", error);
        }
        result
    }

    pub async fn join_session(&self) -> Result<Member, CoordinationError> {
        let result = self.join_session_inner().await;
        self.shared.surface(result)
    }

    async fn join_session_inner(&self) -> Result<Member, CoordinationError> {
        let shared = &self.shared;
        let (session, identity) = shared.with_state(|state| state.writable())?;

        let member =
            membership::join_session(&*shared.deps.store, &session.id, &identity, shared.timeout())
                .await?;

        shared.mutate(|state| {
            if !state.phase.is_terminal() {
                state.joined = true;
            }
        });
        Ok(member)
    }

    /// Tears the session down locally first (channels, timers, pending
    /// sends), then tells the store the member left. Never fails once the
    /// session was open.
    pub async fn leave_session(&self) -> Result<(), CoordinationError> {
        let shared = &self.shared;

        let departed = shared.mutate(|state| {
            if state.phase.is_terminal() {
                return Err(CoordinationError::InvalidState { phase: state.phase });
            }

            let was_member = match state.identity.as_ref() {
                Some(identity) => state.joined || state.presence.is_active_member(&identity.id),
                None => false,
            };
            let departed = match (state.session.as_ref(), state.identity.as_ref(), was_member) {
                (Some(session), Some(identity), true) => {
                    Some((session.id.clone(), identity.id.clone()))
                }
                _ => None,
            };

            state.teardown();
            state.joined = false;
            Ok(departed)
        });
        let departed = shared.surface(departed)?;

        tracing::info!(code = SESSION_CLOSED, "session closed");

        if let Some((session_id, identity_id)) = departed {
            membership::leave_session(
                &*shared.deps.store,
                &session_id,
                &identity_id,
                shared.timeout(),
            )
            .await;
        }
        Ok(())
    }

    /// Reloads the recent window. While reconnecting this restarts the
    /// reconnect loop instead.
    pub async fn refresh(&self) -> Result<(), CoordinationError> {
        let result = match self.shared.phase() {
            SessionPhase::Connected => self.shared.resync().await,
            SessionPhase::Reconnecting => {
                self.shared.ensure_reconnect();
                Ok(())
            }
            phase => Err(CoordinationError::InvalidState { phase }),
        };
        self.shared.surface(result)
    }

    pub fn clear_error(&self) {
        self.shared.mutate(|state| state.error = None);
    }

    /// Publishes an ephemeral typing marker to the other members.
    pub async fn set_typing(&self, typing: bool) -> Result<(), CoordinationError> {
        let shared = &self.shared;
        let result: Result<(), CoordinationError> = async {
            let (session, identity) = shared.with_state(|state| state.writable())?;
            let signal = TypingBroadcast {
                session_id: session.id,
                identity_id: identity.id,
                display_name: identity.display_name,
                typing,
            };
            store_call(
                "set_typing",
                shared.timeout(),
                shared.deps.store.publish_typing(signal),
            )
            .await
        }
        .await;
        shared.surface(result)
    }

    /// Refreshes the caller's `last_active_at`. Requires a joined member.
    pub async fn heartbeat(&self) -> Result<(), CoordinationError> {
        let shared = &self.shared;
        let result: Result<(), CoordinationError> = async {
            let (session, identity, joined) = shared.with_state(|state| {
                state
                    .writable()
                    .map(|(session, identity)| (session, identity, state.joined))
            })?;
            if !joined {
                return Err(CoordinationError::InvalidState {
                    phase: SessionPhase::Connected,
                });
            }

            membership::heartbeat(
                &*shared.deps.store,
                &session.id,
                &identity.id,
                shared.deps.clock.now(),
                shared.timeout(),
            )
            .await
        }
        .await;
        shared.surface(result)
    }
}

fn log_write_failure(operation: &'static str, error: &CoordinationError) {
    let cause = error
        .cause()
        .map(describe_store_cause)
        .unwrap_or_default();
    tracing::warn!(
        code = STORE_WRITE_FAILED,
        operation,
        error = %error,
        cause = %cause,
        "store write failed"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{
        domain::message::MessageKind,
        infra::stubs::StaticAuthProvider,
        test_support::{
            harness, message_at, reaction, test_config, venue_event, wait_for_snapshot,
            SESSION_HANDLE, SESSION_ID, U1, U2,
        },
        usecases::{
            contracts::{ChangeOp, NewMessage, StoreNotification},
            error::StoreError,
        },
    };

    fn raw(stream: StreamKind, op: ChangeOp, record: serde_json::Value) -> StoreNotification {
        StoreNotification {
            stream,
            op,
            record,
            old: None,
        }
    }

    fn row<T: serde::Serialize>(value: &T) -> serde_json::Value {
        serde_json::to_value(value).expect("row should encode")
    }

    async fn connected(coordinator: &Coordinator) -> SessionFacade {
        let facade = coordinator.open(SESSION_HANDLE);
        facade.connect().await.expect("connect should succeed");
        facade
    }

    async fn joined(coordinator: &Coordinator) -> SessionFacade {
        let facade = connected(coordinator).await;
        facade.join_session().await.expect("join should succeed");
        facade
    }

    fn foreign_message(content: &str) -> NewMessage {
        NewMessage {
            session_id: SESSION_ID.to_owned(),
            author_id: U2.to_owned(),
            display_name: "Bo".to_owned(),
            avatar_ref: None,
            content: content.to_owned(),
            kind: MessageKind::Text,
            image_ref: None,
            nonce: Uuid::new_v4().to_string(),
        }
    }

    #[tokio::test]
    async fn join_send_leave_scenario() {
        let h = harness();
        let facade = h.coordinator_u1.open(SESSION_HANDLE);
        assert_eq!(facade.phase(), SessionPhase::Resolving);

        facade.connect().await.expect("connect should succeed");
        assert_eq!(facade.phase(), SessionPhase::Connected);
        let mut rx = facade.subscribe();
        facade.join_session().await.expect("join should succeed");

        facade
            .send_message(MessageDraft::text("hello"))
            .await
            .expect("send should succeed");
        let snapshot = wait_for_snapshot(&mut rx, |s| s.messages.len() == 1 && s.pending.is_empty()).await;
        assert_eq!(snapshot.messages[0].content, "hello");
        assert_eq!(snapshot.messages[0].author_id, U1);

        facade.leave_session().await.expect("leave should succeed");
        assert_eq!(facade.phase(), SessionPhase::Closed);
        assert!(!h.store.member(SESSION_ID, U1).expect("row kept").is_active);

        let other = connected(&h.coordinator_u2).await;
        let mut other_rx = other.subscribe();
        other
            .send_message(MessageDraft::text("after"))
            .await
            .expect("other member can still post");
        wait_for_snapshot(&mut other_rx, |s| s.messages.len() == 2).await;

        let closed = facade.snapshot();
        assert_eq!(closed.messages.len(), 1);
        assert_eq!(closed.connectivity, ConnectivityHealth::Unavailable);
        assert_eq!(
            facade.leave_session().await,
            Err(CoordinationError::InvalidState {
                phase: SessionPhase::Closed
            })
        );
    }

    #[tokio::test]
    async fn eleventh_send_in_a_window_is_rate_limited() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;

        for n in 0..10 {
            facade
                .send_message(MessageDraft::text(format!("msg {n}")))
                .await
                .unwrap_or_else(|error| panic!("send {n} failed: {error}"));
            h.clock.advance(ChronoDuration::seconds(1));
        }

        let denied = facade.send_message(MessageDraft::text("one too many")).await;
        assert_eq!(
            denied,
            Err(CoordinationError::RateLimited {
                retry_after_ms: 50_000
            })
        );
        assert!(facade.snapshot().pending.iter().all(|p| p.message.content != "one too many"));

        h.clock.set(crate::test_support::t0() + ChronoDuration::seconds(61));
        facade
            .send_message(MessageDraft::text("window reset"))
            .await
            .expect("send after the window should succeed");
    }

    #[tokio::test]
    async fn failed_write_rolls_back_pending_message() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let before = facade.snapshot().messages;
        let mut rx = facade.subscribe();
        h.store
            .fail_next_write(StoreError::Rejected("policy violation token=abc".to_owned()));

        let result = facade.send_message(MessageDraft::text("doomed")).await;

        assert_eq!(
            result,
            Err(CoordinationError::StoreFailure(StoreError::Rejected(
                "policy violation token=abc".to_owned()
            )))
        );
        wait_for_snapshot(&mut rx, |s| s.pending.len() == 1).await;
        let after = wait_for_snapshot(&mut rx, |s| s.pending.is_empty() && s.error.is_some()).await;
        assert_eq!(after.messages, before);
        let error = after.error.expect("error is surfaced");
        assert_eq!(error.code, "STORE_FAILURE");
        assert_eq!(error.message, "store operation failed");

        facade
            .send_message(MessageDraft::text("retry"))
            .await
            .expect("a failed write does not use up the send slot");
    }

    #[tokio::test]
    async fn concurrent_sends_share_the_rate_limit() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        h.store
            .set_message_write_delay(Some(Duration::from_millis(20)));

        let mut sends = tokio::task::JoinSet::new();
        for n in 0..11 {
            let facade = facade.clone();
            sends.spawn(async move {
                facade
                    .send_message(MessageDraft::text(format!("burst {n}")))
                    .await
            });
        }

        let mut accepted = 0;
        let mut limited = 0;
        while let Some(joined) = sends.join_next().await {
            match joined.expect("send task should not panic") {
                Ok(_) => accepted += 1,
                Err(CoordinationError::RateLimited { .. }) => limited += 1,
                Err(error) => panic!("unexpected send error: {error}"),
            }
        }

        assert_eq!((accepted, limited), (1, 10));
        assert_eq!(h.store.messages_in(SESSION_ID).len(), 1);
    }

    #[tokio::test]
    async fn reaction_that_overtakes_its_message_is_kept() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let mut rx = facade.subscribe();
        let mut message = message_at("early-m", "late arrival", 0);
        message.session_id = SESSION_ID.to_owned();

        h.store.push_raw(
            SESSION_ID,
            raw(
                StreamKind::Reactions,
                ChangeOp::Insert,
                row(&reaction("early-r", "early-m", U2, "🔥")),
            ),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.store.push_raw(
            SESSION_ID,
            raw(StreamKind::Messages, ChangeOp::Insert, row(&message)),
        );

        let snapshot = wait_for_snapshot(&mut rx, |s| s.message("early-m").is_some()).await;
        let reactions = &snapshot.message("early-m").expect("message").reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].id, "early-r");
    }

    #[tokio::test]
    async fn removal_that_overtakes_its_insert_leaves_no_reaction() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let mut rx = facade.subscribe();
        let mut message = message_at("m-ghost", "hi", 0);
        message.session_id = SESSION_ID.to_owned();
        h.store.push_raw(
            SESSION_ID,
            raw(StreamKind::Messages, ChangeOp::Insert, row(&message)),
        );
        wait_for_snapshot(&mut rx, |s| s.message("m-ghost").is_some()).await;

        h.store.push_raw(
            SESSION_ID,
            raw(
                StreamKind::Reactions,
                ChangeOp::Delete,
                serde_json::json!({ "id": "ghost-r" }),
            ),
        );
        for added in [
            reaction("ghost-r", "m-ghost", U2, "🔥"),
            reaction("marker-r", "m-ghost", U1, "👍"),
        ] {
            h.store.push_raw(
                SESSION_ID,
                raw(StreamKind::Reactions, ChangeOp::Insert, row(&added)),
            );
        }

        let snapshot = wait_for_snapshot(&mut rx, |s| {
            s.message("m-ghost")
                .is_some_and(|m| m.reactions.iter().any(|r| r.id == "marker-r"))
        })
        .await;
        let ids: Vec<&str> = snapshot
            .message("m-ghost")
            .expect("message")
            .reactions
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["marker-r"]);
    }

    #[tokio::test]
    async fn cannot_remove_another_members_reaction() {
        let h = harness();
        let u1 = connected(&h.coordinator_u1).await;
        let u2 = connected(&h.coordinator_u2).await;
        let mut u1_rx = u1.subscribe();

        let message = u1
            .send_message(MessageDraft::text("cheers"))
            .await
            .expect("send");
        wait_for_snapshot(&mut u1_rx, |s| s.message(&message.id).is_some()).await;
        u2.add_reaction(&message.id, "🍻").await.expect("react");
        let snapshot = wait_for_snapshot(&mut u1_rx, |s| {
            s.message(&message.id).is_some_and(|m| m.reactions.len() == 1)
        })
        .await;
        let reaction_id = snapshot.message(&message.id).expect("message").reactions[0]
            .id
            .clone();

        assert_eq!(
            u1.remove_reaction(&reaction_id).await,
            Err(CoordinationError::PermissionDenied)
        );
        assert_eq!(h.store.reactions_on(&message.id).len(), 1);
        assert_eq!(
            u1.snapshot().message(&message.id).expect("message").reactions.len(),
            1
        );
    }

    #[tokio::test]
    async fn author_can_remove_own_reaction() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let mut rx = facade.subscribe();
        let message = facade
            .send_message(MessageDraft::text("hi"))
            .await
            .expect("send");
        wait_for_snapshot(&mut rx, |s| s.message(&message.id).is_some()).await;
        facade.add_reaction(&message.id, "🔥").await.expect("react");
        let snapshot = wait_for_snapshot(&mut rx, |s| {
            s.message(&message.id).is_some_and(|m| m.reactions.len() == 1)
        })
        .await;
        let reaction_id = snapshot.message(&message.id).expect("message").reactions[0]
            .id
            .clone();

        facade.remove_reaction(&reaction_id).await.expect("remove");

        wait_for_snapshot(&mut rx, |s| {
            s.message(&message.id).is_some_and(|m| m.reactions.is_empty())
        })
        .await;
        assert!(h.store.reactions_on(&message.id).is_empty());
    }

    #[tokio::test]
    async fn duplicate_tap_stores_a_single_reaction() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let mut rx = facade.subscribe();
        let message = facade
            .send_message(MessageDraft::text("love it"))
            .await
            .expect("send");
        wait_for_snapshot(&mut rx, |s| s.message(&message.id).is_some()).await;

        let (first, second) = tokio::join!(
            facade.add_reaction(&message.id, "❤️"),
            facade.add_reaction(&message.id, "❤️"),
        );
        assert_eq!(first, Ok(()));
        assert_eq!(second, Ok(()));

        wait_for_snapshot(&mut rx, |s| {
            s.message(&message.id).is_some_and(|m| m.reactions.len() == 1)
        })
        .await;
        facade
            .add_reaction(&message.id, "❤️")
            .await
            .expect("repeat is a no-op");
        assert_eq!(h.store.reactions_on(&message.id).len(), 1);
    }

    #[tokio::test]
    async fn invalid_reaction_input_is_rejected() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let message = facade
            .send_message(MessageDraft::text("hi"))
            .await
            .expect("send");

        assert!(matches!(
            facade.add_reaction(&message.id, "💩").await,
            Err(CoordinationError::InvalidInput { field: "emoji", .. })
        ));
        assert!(matches!(
            facade.remove_reaction("not-an-id").await,
            Err(CoordinationError::InvalidInput {
                field: "reaction_id",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn anonymous_caller_can_read_but_not_write() {
        let h = harness();
        let anonymous = Coordinator::new(
            h.store.clone(),
            Arc::new(StaticAuthProvider::anonymous()),
            test_config(),
            h.clock.clone(),
        );
        let writer = connected(&h.coordinator_u2).await;
        writer
            .send_message(MessageDraft::text("visible to all"))
            .await
            .expect("send");

        let reader = connected(&anonymous).await;

        assert_eq!(reader.snapshot().messages.len(), 1);
        assert_eq!(
            reader.send_message(MessageDraft::text("hi")).await,
            Err(CoordinationError::AuthenticationRequired)
        );
        assert_eq!(
            reader.join_session().await,
            Err(CoordinationError::AuthenticationRequired)
        );
    }

    #[tokio::test]
    async fn writes_before_connect_are_invalid_state() {
        let h = harness();
        let facade = h.coordinator_u1.open(SESSION_HANDLE);

        assert_eq!(
            facade.send_message(MessageDraft::text("early")).await,
            Err(CoordinationError::InvalidState {
                phase: SessionPhase::Resolving
            })
        );
        assert_eq!(
            facade.refresh().await,
            Err(CoordinationError::InvalidState {
                phase: SessionPhase::Resolving
            })
        );
    }

    #[tokio::test]
    async fn unresolvable_session_closes_the_facade() {
        let h = harness();
        let facade = h.coordinator_u1.open("NOPE42");

        assert_eq!(facade.connect().await, Err(CoordinationError::InvalidSession));
        assert_eq!(facade.phase(), SessionPhase::Closed);
        assert_eq!(
            facade.snapshot().error.map(|e| e.code),
            Some("INVALID_SESSION".to_owned())
        );
    }

    #[tokio::test]
    async fn slow_resolution_times_out_and_can_be_retried() {
        let h = harness();
        h.store
            .set_lookup_delay(Some(std::time::Duration::from_secs(5)));
        let facade = h.coordinator_u1.open(SESSION_HANDLE);

        assert_eq!(
            facade.connect().await,
            Err(CoordinationError::Timeout {
                operation: "resolve_session"
            })
        );
        assert_eq!(facade.phase(), SessionPhase::Resolving);

        h.store.set_lookup_delay(None);
        facade.connect().await.expect("retry should connect");
        assert_eq!(facade.phase(), SessionPhase::Connected);
    }

    #[tokio::test]
    async fn lost_channels_reconnect_and_resync_missed_messages() {
        let h = harness();
        let config = CoreConfig {
            max_reconnect_attempts: 500,
            ..test_config()
        };
        let coordinator =
            Coordinator::new(h.store.clone(), h.auth_u1.clone(), config, h.clock.clone());
        let facade = connected(&coordinator).await;
        let mut rx = facade.subscribe();
        facade
            .send_message(MessageDraft::text("before"))
            .await
            .expect("send");
        wait_for_snapshot(&mut rx, |s| s.messages.len() == 1).await;

        h.store.refuse_subscriptions(true);
        h.store.drop_subscriptions(SESSION_ID);

        let reconnecting =
            wait_for_snapshot(&mut rx, |s| s.phase == SessionPhase::Reconnecting).await;
        assert_eq!(reconnecting.messages.len(), 1);
        assert_ne!(reconnecting.connectivity, ConnectivityHealth::Ok);
        assert_eq!(
            facade.send_message(MessageDraft::text("lost")).await,
            Err(CoordinationError::Disconnected)
        );

        h.store
            .insert_message(foreign_message("missed"))
            .await
            .expect("store insert");
        h.store.refuse_subscriptions(false);

        let recovered = wait_for_snapshot(&mut rx, |s| s.phase == SessionPhase::Connected).await;
        let contents: Vec<&str> = recovered.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["before", "missed"]);
        assert_eq!(recovered.connectivity, ConnectivityHealth::Ok);
    }

    #[tokio::test]
    async fn typing_of_others_is_shown_and_expires() {
        let h = harness();
        let u1 = connected(&h.coordinator_u1).await;
        let u2 = connected(&h.coordinator_u2).await;
        let mut rx = u1.subscribe();

        u2.set_typing(true).await.expect("typing");
        u1.set_typing(true).await.expect("typing");

        let snapshot = wait_for_snapshot(&mut rx, |s| !s.typing.is_empty()).await;
        assert_eq!(snapshot.typing.len(), 1);
        assert_eq!(snapshot.typing[0].identity_id, U2);

        h.clock.advance(ChronoDuration::seconds(4));
        u1.clear_error();
        assert!(u1.snapshot().typing.is_empty());
    }

    #[tokio::test]
    async fn one_sweep_clears_every_expired_typist() {
        let h = harness();
        let config = CoreConfig {
            typing_ttl: ChronoDuration::milliseconds(100),
            ..test_config()
        };
        let coordinator =
            Coordinator::new(h.store.clone(), h.auth_u1.clone(), config, h.clock.clone());
        let facade = connected(&coordinator).await;
        let mut rx = facade.subscribe();

        let typist = |identity_id: &str| {
            raw(
                StreamKind::Typing,
                ChangeOp::Insert,
                serde_json::json!({ "identity_id": identity_id, "display_name": identity_id }),
            )
        };
        h.store.push_raw(SESSION_ID, typist("typist-a"));
        wait_for_snapshot(&mut rx, |s| s.typing.len() == 1).await;
        h.clock.advance(ChronoDuration::milliseconds(50));
        h.store.push_raw(SESSION_ID, typist("typist-b"));
        wait_for_snapshot(&mut rx, |s| s.typing.len() == 2).await;
        assert!(facade
            .shared
            .with_state(|state| state.tasks.typing_sweep.is_some()));

        h.clock.advance(ChronoDuration::milliseconds(150));
        wait_for_snapshot(&mut rx, |s| s.typing.is_empty()).await;

        facade.shared.with_state(|state| {
            assert!(state.presence.next_typing_expiry().is_none());
            assert!(state.tasks.typing_sweep.is_none());
        });
    }

    #[tokio::test]
    async fn leave_discards_unacked_sends_and_stops_the_typing_sweep() {
        let h = harness();
        let u1 = joined(&h.coordinator_u1).await;
        let u2 = connected(&h.coordinator_u2).await;
        let mut rx = u1.subscribe();

        u2.set_typing(true).await.expect("typing");
        wait_for_snapshot(&mut rx, |s| !s.typing.is_empty()).await;
        assert!(u1
            .shared
            .with_state(|state| state.tasks.typing_sweep.is_some()));

        h.store
            .set_message_write_delay(Some(Duration::from_millis(200)));
        let sender = u1.clone();
        let send =
            tokio::spawn(async move { sender.send_message(MessageDraft::text("unacked")).await });
        wait_for_snapshot(&mut rx, |s| s.pending.len() == 1).await;

        u1.leave_session().await.expect("leave");
        let closed = wait_for_snapshot(&mut rx, |s| s.phase == SessionPhase::Closed).await;
        assert!(closed.pending.is_empty());
        assert!(closed.typing.is_empty());
        assert!(u1
            .shared
            .with_state(|state| state.tasks.typing_sweep.is_none()));

        send.await
            .expect("send task should not panic")
            .expect("store still acks the write");
        h.clock.advance(ChronoDuration::seconds(5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "no snapshot after close");
        assert!(u1.snapshot().pending.is_empty());
    }

    #[tokio::test]
    async fn domain_events_fan_out_to_external_listeners() {
        let h = harness();
        let u1 = connected(&h.coordinator_u1).await;
        let mut events = u1.domain_events();
        let u2 = joined(&h.coordinator_u2).await;

        u2.send_message(MessageDraft::text("ping"))
            .await
            .expect("send");

        let mut saw_join = false;
        let mut saw_message = false;
        while !(saw_join && saw_message) {
            let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
                .await
                .expect("event should arrive")
                .expect("channel open");
            match event {
                DomainEvent::MemberJoined(member) => saw_join |= member.identity_id == U2,
                DomainEvent::MessageCreated(message) => saw_message |= message.content == "ping",
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn roster_tracks_join_and_leave() {
        let h = harness();
        let u1 = joined(&h.coordinator_u1).await;
        let mut rx = u1.subscribe();
        let u2 = joined(&h.coordinator_u2).await;

        let snapshot = wait_for_snapshot(&mut rx, |s| s.members.len() == 2).await;
        assert!(snapshot.joined);
        assert!(snapshot.members.iter().all(|m| m.is_online));

        u2.leave_session().await.expect("leave");
        let snapshot = wait_for_snapshot(&mut rx, |s| s.members.len() == 1).await;
        assert_eq!(snapshot.members[0].identity_id, U1);
    }

    #[tokio::test]
    async fn heartbeat_requires_membership() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        assert_eq!(
            facade.heartbeat().await,
            Err(CoordinationError::InvalidState {
                phase: SessionPhase::Connected
            })
        );

        facade.join_session().await.expect("join");
        h.clock.advance(ChronoDuration::minutes(10));
        facade.heartbeat().await.expect("heartbeat");

        assert_eq!(
            h.store.member(SESSION_ID, U1).map(|m| m.last_active_at),
            Some(crate::test_support::t0() + ChronoDuration::minutes(10))
        );
    }

    #[tokio::test]
    async fn moderation_flag_and_venue_events_reach_the_snapshot() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let mut rx = facade.subscribe();
        let message = facade
            .send_message(MessageDraft::text("borderline"))
            .await
            .expect("send");
        wait_for_snapshot(&mut rx, |s| s.message(&message.id).is_some()).await;

        h.store.flag_message(&message.id).expect("flag");
        let mut event = venue_event("e1", 3_600);
        event.session_id = SESSION_ID.to_owned();
        h.store.put_event(event);

        let snapshot = wait_for_snapshot(&mut rx, |s| {
            s.events.len() == 1 && s.message(&message.id).is_some_and(|m| m.flagged)
        })
        .await;
        assert_eq!(snapshot.messages.len(), 1);

        h.store.delete_event("e1").expect("delete");
        wait_for_snapshot(&mut rx, |s| s.events.is_empty()).await;
    }

    #[tokio::test]
    async fn clear_error_resets_surfaced_error() {
        let h = harness();
        let facade = connected(&h.coordinator_u1).await;
        let _ = facade.send_message(MessageDraft::text("   ")).await;
        assert_eq!(
            facade.snapshot().error.map(|e| e.code),
            Some("INVALID_INPUT".to_owned())
        );

        facade.clear_error();

        assert!(facade.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn sign_out_is_picked_up_on_next_connect() {
        let h = harness();
        h.auth_u1.sign_out();
        let facade = connected(&h.coordinator_u1).await;

        assert!(facade.snapshot().identity.is_none());
    }

    #[tokio::test]
    async fn sign_out_only_affects_that_callers_sessions() {
        let h = harness();
        h.auth_u2.sign_out();

        let u1 = connected(&h.coordinator_u1).await;
        let u2 = connected(&h.coordinator_u2).await;

        assert_eq!(
            u1.snapshot().identity.map(|identity| identity.id),
            Some(U1.to_owned())
        );
        assert_eq!(
            u2.send_message(MessageDraft::text("hi")).await,
            Err(CoordinationError::AuthenticationRequired)
        );
    }
}
