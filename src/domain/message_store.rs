//! Session-scoped message log with a reaction overlay and optimistic
//! pending entries.

use std::collections::{HashMap, HashSet, VecDeque};

use super::message::{Message, PendingMessage, Reaction};

pub const DEFAULT_RESYNC_WINDOW: usize = 100;

/// Cap on reactions held for messages that have not arrived yet, and on
/// removals held for reactions that have not arrived yet. Oldest go first.
pub const MAX_OUT_OF_ORDER: usize = 256;

#[derive(Debug, Clone)]
pub struct MessageStore {
    /// Sorted by `(created_at, id)`. Reactions live in `reactions`, not here.
    log: Vec<Message>,
    ids: HashSet<String>,
    reactions: HashMap<String, Vec<Reaction>>,
    reaction_message: HashMap<String, String>,
    /// Reactions whose message is not in the log yet.
    deferred: VecDeque<Reaction>,
    /// Reaction ids removed before their insert was seen.
    removed_early: VecDeque<String>,
    pending: Vec<PendingMessage>,
    window: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_RESYNC_WINDOW)
    }
}

impl MessageStore {
    pub fn new(window: usize) -> Self {
        Self {
            log: Vec::new(),
            ids: HashSet::new(),
            reactions: HashMap::new(),
            reaction_message: HashMap::new(),
            deferred: VecDeque::new(),
            removed_early: VecDeque::new(),
            pending: Vec::new(),
            window: window.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    /// Inserts a confirmed message. No-op when the id is already present.
    /// A pending entry with the same nonce is retired.
    pub fn append(&mut self, mut message: Message) -> bool {
        if let Some(nonce) = message.nonce.as_deref() {
            self.pending.retain(|pending| pending.nonce != nonce);
        }

        if self.ids.contains(&message.id) {
            return false;
        }

        let seeded = std::mem::take(&mut message.reactions);
        let position = self
            .log
            .partition_point(|existing| existing.order_key() < message.order_key());
        let message_id = message.id.clone();
        self.ids.insert(message_id.clone());
        self.log.insert(position, message);

        let (early, rest): (VecDeque<Reaction>, VecDeque<Reaction>) =
            std::mem::take(&mut self.deferred)
                .into_iter()
                .partition(|reaction| reaction.message_id == message_id);
        self.deferred = rest;

        for reaction in seeded.into_iter().chain(early) {
            self.apply_reaction(reaction);
        }

        true
    }

    /// Applies a server-side edit or moderation flag. Position is kept.
    pub fn update(&mut self, message: Message) -> bool {
        let Some(existing) = self.log.iter_mut().find(|m| m.id == message.id) else {
            return false;
        };

        existing.content = message.content;
        existing.display_name = message.display_name;
        existing.avatar_ref = message.avatar_ref;
        existing.image_ref = message.image_ref;
        existing.edited_at = message.edited_at;
        existing.flagged = message.flagged;
        true
    }

    /// Adds a reaction. Returns false for duplicates by id or by
    /// (author, emoji), for ids already removed, and for messages not in
    /// the log yet; those are held and applied when the message arrives.
    pub fn apply_reaction(&mut self, reaction: Reaction) -> bool {
        if let Some(index) = self.removed_early.iter().position(|id| *id == reaction.id) {
            self.removed_early.remove(index);
            return false;
        }
        if self.reaction_message.contains_key(&reaction.id) {
            return false;
        }
        if !self.ids.contains(&reaction.message_id) {
            if !self.deferred.iter().any(|held| held.id == reaction.id) {
                if self.deferred.len() >= MAX_OUT_OF_ORDER {
                    self.deferred.pop_front();
                }
                self.deferred.push_back(reaction);
            }
            return false;
        }

        let set = self.reactions.entry(reaction.message_id.clone()).or_default();
        if set
            .iter()
            .any(|r| r.author_id == reaction.author_id && r.emoji == reaction.emoji)
        {
            return false;
        }

        self.reaction_message
            .insert(reaction.id.clone(), reaction.message_id.clone());
        set.push(reaction);
        true
    }

    /// Removes a reaction. An id not seen yet is remembered so its late
    /// insert is dropped.
    pub fn remove_reaction(&mut self, reaction_id: &str) -> Option<Reaction> {
        if let Some(index) = self.deferred.iter().position(|held| held.id == reaction_id) {
            return self.deferred.remove(index);
        }
        let Some(message_id) = self.reaction_message.remove(reaction_id) else {
            if !self.removed_early.iter().any(|id| id == reaction_id) {
                if self.removed_early.len() >= MAX_OUT_OF_ORDER {
                    self.removed_early.pop_front();
                }
                self.removed_early.push_back(reaction_id.to_owned());
            }
            return None;
        };
        let set = self.reactions.get_mut(&message_id)?;
        let index = set.iter().position(|r| r.id == reaction_id)?;
        let removed = set.remove(index);
        if set.is_empty() {
            self.reactions.remove(&message_id);
        }
        Some(removed)
    }

    pub fn find_reaction(&self, reaction_id: &str) -> Option<&Reaction> {
        let message_id = self.reaction_message.get(reaction_id)?;
        self.reactions
            .get(message_id)?
            .iter()
            .find(|r| r.id == reaction_id)
    }

    pub fn has_reaction(&self, message_id: &str, author_id: &str, emoji: &str) -> bool {
        self.reactions
            .get(message_id)
            .map(|set| {
                set.iter()
                    .any(|r| r.author_id == author_id && r.emoji == emoji)
            })
            .unwrap_or(false)
    }

    pub fn reactions_for(&self, message_id: &str) -> &[Reaction] {
        self.reactions
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Merges an authoritative recent window into the log.
    ///
    /// Missing messages are appended in `(created_at, id)` order, known
    /// messages get their mutable fields and reaction set refreshed, and the
    /// oldest entries beyond the window are dropped. Returns how many
    /// messages were added.
    pub fn resync(&mut self, snapshot: Vec<Message>) -> usize {
        let mut added = 0;

        for mut message in snapshot {
            if self.ids.contains(&message.id) {
                let reactions = std::mem::take(&mut message.reactions);
                self.replace_reactions(&message.id, reactions);
                self.update(message);
            } else if self.append(message) {
                added += 1;
            }
        }

        self.trim_to_window();
        added
    }

    pub fn insert_pending(&mut self, pending: PendingMessage) {
        if self.pending.iter().any(|p| p.nonce == pending.nonce) {
            return;
        }
        self.pending.push(pending);
    }

    pub fn is_pending(&self, nonce: &str) -> bool {
        self.pending.iter().any(|p| p.nonce == nonce)
    }

    pub fn rollback_pending(&mut self, nonce: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.nonce != nonce);
        before != self.pending.len()
    }

    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Chronological view with reactions attached.
    pub fn messages(&self) -> Vec<Message> {
        self.log.iter().map(|m| self.materialize(m)).collect()
    }

    /// Most-recent-first view for display.
    pub fn recent_first(&self, limit: usize) -> Vec<Message> {
        self.log
            .iter()
            .rev()
            .take(limit)
            .map(|m| self.materialize(m))
            .collect()
    }

    pub fn get(&self, message_id: &str) -> Option<Message> {
        self.log
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| self.materialize(m))
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.ids.clear();
        self.reactions.clear();
        self.reaction_message.clear();
        self.deferred.clear();
        self.removed_early.clear();
        self.pending.clear();
    }

    fn materialize(&self, message: &Message) -> Message {
        let mut message = message.clone();
        message.reactions = self.reactions_for(&message.id).to_vec();
        message
    }

    fn replace_reactions(&mut self, message_id: &str, reactions: Vec<Reaction>) {
        if let Some(previous) = self.reactions.remove(message_id) {
            for reaction in previous {
                self.reaction_message.remove(&reaction.id);
            }
        }

        for reaction in reactions {
            self.apply_reaction(reaction);
        }
    }

    fn trim_to_window(&mut self) {
        if self.log.len() <= self.window {
            return;
        }

        let excess = self.log.len() - self.window;
        for dropped in self.log.drain(..excess) {
            self.ids.remove(&dropped.id);
            if let Some(set) = self.reactions.remove(&dropped.id) {
                for reaction in set {
                    self.reaction_message.remove(&reaction.id);
                }
            }
        }
    }
}
