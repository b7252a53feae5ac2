//! One logical channel per (session, stream). Channels open on first
//! interest, are shared by every observer of the same key, and close when
//! the last observer detaches. Every channel of a session forwards into a
//! single feed, so all observers see one receipt order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    domain::events::{DomainEvent, StreamKind},
    realtime::decode::decode,
    usecases::{
        contracts::{ChatStore, StoreNotification, SubscriptionFilter},
        error::StoreError,
    },
};

const CHANNEL_OPENED: &str = "WOLFPACK_CHANNEL_OPENED";
const CHANNEL_CLOSED: &str = "WOLFPACK_CHANNEL_CLOSED";
const CHANNEL_DISCONNECTED: &str = "WOLFPACK_CHANNEL_DISCONNECTED";
const CHANNEL_RECONNECTED: &str = "WOLFPACK_CHANNEL_RECONNECTED";
const CHANNEL_DECODE_FAILED: &str = "WOLFPACK_CHANNEL_DECODE_FAILED";

pub const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Event {
        stream: StreamKind,
        event: DomainEvent,
    },
    ChannelDown {
        stream: StreamKind,
    },
    ChannelUp {
        stream: StreamKind,
    },
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn ChatStore>,
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, SessionChannels>,
}

struct SessionChannels {
    feed: broadcast::Sender<FeedItem>,
    channels: HashMap<StreamKind, Channel>,
}

struct Channel {
    observers: usize,
    connected: bool,
    opening: bool,
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Channel {
    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

/// An observer's hold on a session's channels. Dropping it detaches.
pub struct Subscription {
    manager: SubscriptionManager,
    session_id: String,
    streams: Vec<StreamKind>,
    feed: Option<broadcast::Receiver<FeedItem>>,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn streams(&self) -> &[StreamKind] {
        &self.streams
    }

    /// Hands the feed to whoever drives event application. Only the first
    /// call returns it.
    pub fn take_feed(&mut self) -> Option<broadcast::Receiver<FeedItem>> {
        self.feed.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.detach(&self.session_id, &self.streams);
    }
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Registers interest in `streams` of a session, opening whichever
    /// channels are not open yet. On failure nothing stays attached.
    pub async fn attach(
        &self,
        session_id: &str,
        streams: &[StreamKind],
    ) -> Result<Subscription, StoreError> {
        let (feed, to_open) = {
            let mut registry = self.lock();
            let session = registry
                .sessions
                .entry(session_id.to_owned())
                .or_insert_with(|| SessionChannels {
                    feed: broadcast::channel(FEED_CAPACITY).0,
                    channels: HashMap::new(),
                });

            let mut to_open = Vec::new();
            for stream in streams {
                let channel = session.channels.entry(*stream).or_insert(Channel {
                    observers: 0,
                    connected: false,
                    opening: false,
                    generation: 0,
                    stop_tx: None,
                });
                channel.observers += 1;
                if !channel.connected && !channel.opening {
                    channel.opening = true;
                    channel.generation += 1;
                    to_open.push((*stream, channel.generation));
                }
            }
            (session.feed.subscribe(), to_open)
        };

        let subscription = Subscription {
            manager: self.clone(),
            session_id: session_id.to_owned(),
            streams: streams.to_vec(),
            feed: Some(feed),
        };

        for (stream, generation) in to_open {
            // Dropping `subscription` on error detaches every stream above.
            self.open_channel(session_id, stream, generation).await?;
            tracing::debug!(
                code = CHANNEL_OPENED,
                session_id,
                stream = stream.as_label(),
                "realtime channel opened"
            );
        }

        Ok(subscription)
    }

    /// Re-opens a channel that lost its stream. Returns `Ok(false)` when
    /// another observer is already reconnecting it.
    pub async fn reconnect(&self, session_id: &str, stream: StreamKind) -> Result<bool, StoreError> {
        let generation = {
            let mut registry = self.lock();
            let Some(channel) = registry
                .sessions
                .get_mut(session_id)
                .and_then(|session| session.channels.get_mut(&stream))
            else {
                return Ok(false);
            };

            if channel.connected {
                return Ok(true);
            }
            if channel.opening {
                return Ok(false);
            }
            channel.opening = true;
            channel.generation += 1;
            channel.generation
        };

        self.open_channel(session_id, stream, generation).await?;
        tracing::info!(
            code = CHANNEL_RECONNECTED,
            session_id,
            stream = stream.as_label(),
            "realtime channel reconnected"
        );
        Ok(true)
    }

    pub fn is_connected(&self, session_id: &str, stream: StreamKind) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|session| session.channels.get(&stream))
            .is_some_and(|channel| channel.connected)
    }

    /// Per-stream connectivity of a session, in stream order.
    pub fn channel_states(&self, session_id: &str) -> Vec<(StreamKind, bool)> {
        let registry = self.lock();
        let Some(session) = registry.sessions.get(session_id) else {
            return Vec::new();
        };

        let mut states: Vec<(StreamKind, bool)> = session
            .channels
            .iter()
            .map(|(stream, channel)| (*stream, channel.connected))
            .collect();
        states.sort();
        states
    }

    pub fn observers(&self, session_id: &str, stream: StreamKind) -> usize {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|session| session.channels.get(&stream))
            .map(|channel| channel.observers)
            .unwrap_or(0)
    }

    pub fn open_channel_count(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .map(|session| session.channels.len())
            .sum()
    }

    async fn open_channel(
        &self,
        session_id: &str,
        stream: StreamKind,
        generation: u64,
    ) -> Result<(), StoreError> {
        let filter = SubscriptionFilter {
            session_id: session_id.to_owned(),
            stream,
        };

        let receiver = match self.store.subscribe(filter).await {
            Ok(receiver) => receiver,
            Err(error) => {
                self.with_channel(session_id, stream, generation, |channel, _| {
                    channel.opening = false;
                });
                return Err(error);
            }
        };

        let registry = Arc::clone(&self.registry);
        let session_key = session_id.to_owned();
        self.with_channel(session_id, stream, generation, move |channel, feed| {
            let (stop_tx, stop_rx) = watch::channel(false);
            channel.stop_tx = Some(stop_tx);
            channel.connected = true;
            channel.opening = false;
            let _ = feed.send(FeedItem::ChannelUp { stream });

            tokio::spawn(run_pump(PumpContext {
                registry,
                session_id: session_key,
                stream,
                generation,
                feed: feed.clone(),
                receiver,
                stop_rx,
            }));
        });

        Ok(())
    }

    /// Runs `apply` only if the channel still exists at `generation`.
    fn with_channel<F>(&self, session_id: &str, stream: StreamKind, generation: u64, apply: F)
    where
        F: FnOnce(&mut Channel, &broadcast::Sender<FeedItem>),
    {
        let mut registry = self.lock();
        if let Some(session) = registry.sessions.get_mut(session_id) {
            let SessionChannels { feed, channels } = session;
            if let Some(channel) = channels.get_mut(&stream) {
                if channel.generation == generation {
                    apply(channel, feed);
                }
            }
        }
    }

    fn detach(&self, session_id: &str, streams: &[StreamKind]) {
        let mut registry = self.lock();
        let Some(session) = registry.sessions.get_mut(session_id) else {
            return;
        };

        for stream in streams {
            let Some(channel) = session.channels.get_mut(stream) else {
                continue;
            };
            channel.observers = channel.observers.saturating_sub(1);
            if channel.observers == 0 {
                channel.stop();
                session.channels.remove(stream);
                tracing::debug!(
                    code = CHANNEL_CLOSED,
                    session_id,
                    stream = stream.as_label(),
                    "realtime channel closed"
                );
            }
        }

        if session.channels.is_empty() {
            registry.sessions.remove(session_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct PumpContext {
    registry: Arc<Mutex<Registry>>,
    session_id: String,
    stream: StreamKind,
    generation: u64,
    feed: broadcast::Sender<FeedItem>,
    receiver: mpsc::UnboundedReceiver<StoreNotification>,
    stop_rx: watch::Receiver<bool>,
}

async fn run_pump(mut ctx: PumpContext) {
    loop {
        tokio::select! {
            changed = ctx.stop_rx.changed() => {
                if changed.is_err() || *ctx.stop_rx.borrow() {
                    return;
                }
            }
            notification = ctx.receiver.recv() => {
                match notification {
                    Some(notification) => forward(&ctx, notification),
                    None => {
                        mark_disconnected(&ctx);
                        return;
                    }
                }
            }
        }
    }
}

fn forward(ctx: &PumpContext, notification: StoreNotification) {
    match decode(notification) {
        Ok(Some(event)) => {
            let _ = ctx.feed.send(FeedItem::Event {
                stream: ctx.stream,
                event,
            });
        }
        Ok(None) => {}
        Err(error) => {
            tracing::warn!(
                code = CHANNEL_DECODE_FAILED,
                session_id = %ctx.session_id,
                stream = ctx.stream.as_label(),
                error = %error,
                "dropping undecodable notification"
            );
        }
    }
}

fn mark_disconnected(ctx: &PumpContext) {
    let mut registry = ctx
        .registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let current = registry
        .sessions
        .get_mut(&ctx.session_id)
        .and_then(|session| session.channels.get_mut(&ctx.stream))
        .filter(|channel| channel.generation == ctx.generation);

    if let Some(channel) = current {
        channel.connected = false;
        channel.stop_tx = None;
        tracing::warn!(
            code = CHANNEL_DISCONNECTED,
            session_id = %ctx.session_id,
            stream = ctx.stream.as_label(),
            "realtime channel lost its stream"
        );
        let _ = ctx.feed.send(FeedItem::ChannelDown { stream: ctx.stream });
    }
}
