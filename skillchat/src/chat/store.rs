//! Per-partner ordered message lists.
//!
//! [`ConversationStore::merge`] is the single convergence point for every
//! data path (cache, REST thread fetch, live `newMessage`, sync backfill):
//! it deduplicates by message id, keeps the first-seen slot and body,
//! absorbs later knowledge, and keeps the list in display order. Because
//! merge is idempotent and insensitive to arrival order, the paths may race
//! freely.
//!
//! The store is the only writer of thread snapshots in the cache.

use std::collections::HashMap;
use std::sync::Arc;

use skillchat_proto::message::{ConversationId, Message, MessageId, SequenceNumber, UserId};

use crate::cache::{CachePort, SnapshotCache, ThreadSnapshot};

/// The ordered history with one partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// The other participant.
    pub partner_id: UserId,
    /// Server conversation id, once known.
    pub conversation_id: Option<ConversationId>,
    /// Messages in display order.
    pub messages: Vec<Message>,
}

impl Conversation {
    fn new(partner_id: UserId) -> Self {
        Self {
            partner_id,
            conversation_id: None,
            messages: Vec::new(),
        }
    }

    /// Highest sequence number present in the list.
    #[must_use]
    pub fn max_sequence(&self) -> SequenceNumber {
        self.messages
            .iter()
            .filter_map(|m| m.sequence)
            .max()
            .unwrap_or(SequenceNumber::ZERO)
    }

    fn sort(&mut self) {
        self.messages.sort_by(Message::display_order);
    }
}

/// Whether two lists are equal for view purposes: same length and every
/// element pairwise [`Message::same_content`].
#[must_use]
pub fn same_list(a: &[Message], b: &[Message]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_content(y))
}

/// Where [`ConversationStore::load`] found the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Already in memory.
    Memory,
    /// Restored from the cache snapshot.
    Cache,
    /// Nothing known yet; an empty conversation was created.
    Empty,
}

/// In-memory conversations with write-through to the snapshot cache.
pub struct ConversationStore<C: CachePort> {
    cache: Arc<SnapshotCache<C>>,
    threads: HashMap<UserId, Conversation>,
}

impl<C: CachePort> ConversationStore<C> {
    /// An empty store persisting through `cache`.
    pub fn new(cache: Arc<SnapshotCache<C>>) -> Self {
        Self {
            cache,
            threads: HashMap::new(),
        }
    }

    /// Make the conversation with `partner` available, cache first.
    ///
    /// The caller is expected to follow up with an authoritative fetch.
    pub fn load(&mut self, partner: &UserId) -> LoadSource {
        if self.threads.contains_key(partner) {
            return LoadSource::Memory;
        }
        let mut conversation = Conversation::new(partner.clone());
        let source = match self.cache.load_thread(partner) {
            Some(snapshot) => {
                conversation.conversation_id = snapshot.conversation_id;
                conversation.messages = snapshot.messages;
                conversation.sort();
                tracing::debug!(
                    partner = %partner,
                    count = conversation.messages.len(),
                    "restored thread from cache"
                );
                LoadSource::Cache
            }
            None => LoadSource::Empty,
        };
        self.threads.insert(partner.clone(), conversation);
        source
    }

    /// The conversation with `partner`, if loaded.
    #[must_use]
    pub fn conversation(&self, partner: &UserId) -> Option<&Conversation> {
        self.threads.get(partner)
    }

    /// Messages with `partner` in display order; empty if not loaded.
    #[must_use]
    pub fn messages(&self, partner: &UserId) -> &[Message] {
        self.threads
            .get(partner)
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    /// Fold `incoming` into the conversation with `partner`.
    ///
    /// Returns `true` if the list changed.
    pub fn merge(&mut self, partner: &UserId, incoming: &[Message]) -> bool {
        if incoming.is_empty() {
            return false;
        }
        let conversation = self
            .threads
            .entry(partner.clone())
            .or_insert_with(|| Conversation::new(partner.clone()));

        let mut index: HashMap<MessageId, usize> = conversation
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut changed = false;
        for message in incoming {
            if conversation.conversation_id.is_none() && message.conversation_id.is_some() {
                conversation.conversation_id.clone_from(&message.conversation_id);
                changed = true;
            }
            if let Some(&slot) = index.get(&message.id) {
                changed |= conversation.messages[slot].absorb(message);
            } else {
                index.insert(message.id.clone(), conversation.messages.len());
                conversation.messages.push(message.clone());
                changed = true;
            }
        }

        if changed {
            conversation.sort();
            self.persist(partner);
        }
        changed
    }

    /// Record the server conversation id for `partner`.
    ///
    /// A thread page carries the id even before any message was exchanged.
    /// The message list is untouched; returns `true` if the id was new.
    pub fn adopt_conversation_id(&mut self, partner: &UserId, id: &ConversationId) -> bool {
        let conversation = self
            .threads
            .entry(partner.clone())
            .or_insert_with(|| Conversation::new(partner.clone()));
        if conversation.conversation_id.as_ref() == Some(id) {
            return false;
        }
        conversation.conversation_id = Some(id.clone());
        self.persist(partner);
        true
    }

    /// Single live arrival; same semantics as [`merge`](Self::merge).
    pub fn append(&mut self, partner: &UserId, message: Message) -> bool {
        self.merge(partner, std::slice::from_ref(&message))
    }

    /// Swap the optimistic entry `temp_id` for the authoritative `real`
    /// copy, in the same slot.
    ///
    /// If `real` already arrived through another path, the optimistic entry
    /// is dropped instead so the id appears exactly once.
    pub fn replace(&mut self, partner: &UserId, temp_id: &MessageId, real: Message) -> bool {
        let conversation = self
            .threads
            .entry(partner.clone())
            .or_insert_with(|| Conversation::new(partner.clone()));

        if conversation.conversation_id.is_none() {
            conversation.conversation_id.clone_from(&real.conversation_id);
        }
        let temp_slot = conversation.messages.iter().position(|m| &m.id == temp_id);
        let real_slot = conversation.messages.iter().position(|m| m.id == real.id);

        match (temp_slot, real_slot) {
            (Some(temp), None) => conversation.messages[temp] = real,
            (Some(temp), Some(existing)) => {
                conversation.messages[existing].absorb(&real);
                conversation.messages.remove(temp);
            }
            (None, Some(existing)) => {
                conversation.messages[existing].absorb(&real);
            }
            (None, None) => conversation.messages.push(real),
        }

        conversation.sort();
        self.persist(partner);
        true
    }

    /// Drop the entry `id`; used to roll back a failed send.
    pub fn remove(&mut self, partner: &UserId, id: &MessageId) -> Option<Message> {
        let conversation = self.threads.get_mut(partner)?;
        let slot = conversation.messages.iter().position(|m| &m.id == id)?;
        let removed = conversation.messages.remove(slot);
        if !removed.id.is_temporary() {
            self.persist(partner);
        }
        Some(removed)
    }

    /// Write the confirmed part of the conversation to the cache.
    /// Optimistic entries are never persisted.
    fn persist(&self, partner: &UserId) {
        let Some(conversation) = self.threads.get(partner) else {
            return;
        };
        let snapshot = ThreadSnapshot {
            conversation_id: conversation.conversation_id.clone(),
            last_seen: conversation.max_sequence(),
            messages: conversation
                .messages
                .iter()
                .filter(|m| !m.id.is_temporary())
                .cloned()
                .collect(),
        };
        self.cache.store_thread(partner, &snapshot);
    }
}
