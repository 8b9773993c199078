//! Messaging engine for the inbox.
//!
//! [`InboxEngine`] composes the conversation store, receipt tracker,
//! sequence sync, roster aggregator and typing signal behind one lock, and
//! publishes an [`InboxView`] through a `watch` channel whenever something
//! observable changes. The UI reads the view and calls the imperative
//! operations; the driver ([`InboxEngine::run`]) feeds live-channel events in.
//!
//! The state lock is never held across a network call. Every data path ends
//! in the same idempotent merge, so REST results, live events and sync
//! backfills may interleave in any order.

pub mod receipts;
pub mod receive;
pub mod roster;
pub mod send;
pub mod store;
pub mod sync;
pub mod typing;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use skillchat_proto::message::{Message, MessageId, ReceiptStatus, SequenceNumber, UserId};
use skillchat_proto::roster::{Contact, RosterContext};
use tokio::sync::{Mutex, watch};

use crate::api::{ApiError, ChatApi};
use crate::cache::{CachePort, SnapshotCache};
use crate::config::EngineConfig;
use crate::transport::ConnectionState;
use crate::transport::connection::SignalSender;

use receipts::ReceiptTracker;
use roster::RosterAggregator;
use send::SendFailure;
use store::{ConversationStore, LoadSource, same_list};
use sync::{SequenceSync, SyncTrigger};
use typing::TypingSignal;

/// A dismissible notification about a failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Intended recipient.
    pub partner: UserId,
    /// Why the send failed.
    pub reason: SendFailure,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message to {} not sent: {}", self.partner, self.reason)
    }
}

/// Everything the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxView {
    /// The open conversation's partner.
    pub active: Option<UserId>,
    /// The open conversation, in display order.
    pub messages: Vec<Message>,
    /// Receipt status per message id.
    pub receipts: HashMap<MessageId, ReceiptStatus>,
    /// Whether the open partner is typing.
    pub partner_typing: bool,
    /// Live channel state.
    pub connection: ConnectionState,
    /// Sorted contacts for the current context.
    pub contacts: Vec<Contact>,
    /// Sum of unread counts.
    pub total_unread: u32,
    /// Current input text; restored after a failed send.
    pub draft: String,
    /// Last send failure, until dismissed.
    pub notice: Option<Notice>,
}

impl InboxView {
    /// View equality: the message list is compared with [`same_list`],
    /// everything else structurally.
    fn same_as(&self, other: &Self) -> bool {
        self.active == other.active
            && same_list(&self.messages, &other.messages)
            && self.receipts == other.receipts
            && self.partner_typing == other.partner_typing
            && self.connection == other.connection
            && self.contacts == other.contacts
            && self.total_unread == other.total_unread
            && self.draft == other.draft
            && self.notice == other.notice
    }
}

/// Mutable engine state, guarded by one lock.
struct EngineState<C: CachePort> {
    active: Option<UserId>,
    visible: bool,
    store: ConversationStore<C>,
    receipts: ReceiptTracker,
    sync: SequenceSync,
    roster: RosterAggregator,
    typing: TypingSignal,
    partner_typing: bool,
    connection: ConnectionState,
    draft: String,
    notice: Option<Notice>,
}

impl<C: CachePort> EngineState<C> {
    fn view(&self) -> InboxView {
        let messages = self
            .active
            .as_ref()
            .map(|partner| self.store.messages(partner).to_vec())
            .unwrap_or_default();
        InboxView {
            active: self.active.clone(),
            messages,
            receipts: self.receipts.snapshot(),
            partner_typing: self.partner_typing,
            connection: self.connection,
            contacts: self.roster.contacts().to_vec(),
            total_unread: self.roster.total_unread(),
            draft: self.draft.clone(),
            notice: self.notice.clone(),
        }
    }

    fn is_open(&self, partner: &UserId) -> bool {
        self.active.as_ref() == Some(partner)
    }
}

/// The direct-messaging engine for one signed-in user.
pub struct InboxEngine<A: ChatApi, C: CachePort> {
    me: UserId,
    api: Arc<A>,
    cache: Arc<SnapshotCache<C>>,
    signals: SignalSender,
    config: EngineConfig,
    state: Mutex<EngineState<C>>,
    view_tx: watch::Sender<InboxView>,
    sending: AtomicBool,
}

impl<A: ChatApi, C: CachePort> InboxEngine<A, C> {
    /// Build an engine for `me`, starting in `context`.
    ///
    /// A cached roster for `context` is shown immediately; call
    /// [`refresh_roster`](Self::refresh_roster) to fetch the current one.
    pub fn new(
        me: UserId,
        api: Arc<A>,
        cache: Arc<SnapshotCache<C>>,
        signals: SignalSender,
        context: RosterContext,
        config: EngineConfig,
    ) -> Self {
        let mut roster = RosterAggregator::new(context);
        if let Some(cached) = cache.load_roster(roster.context()) {
            tracing::debug!(context = %roster.context(), count = cached.len(), "restored roster from cache");
            roster.restore(cached);
        }
        let connection = signals.connection_state();
        let state = EngineState {
            active: None,
            visible: true,
            store: ConversationStore::new(Arc::clone(&cache)),
            receipts: ReceiptTracker::new(),
            sync: SequenceSync::new(),
            roster,
            typing: TypingSignal::new(signals.clone(), config.typing_idle_timeout),
            partner_typing: false,
            connection,
            draft: String::new(),
            notice: None,
        };
        let (view_tx, _) = watch::channel(state.view());
        Self {
            me,
            api,
            cache,
            signals,
            config,
            state: Mutex::new(state),
            view_tx,
            sending: AtomicBool::new(false),
        }
    }

    /// The signed-in user.
    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    /// Reactive view for the UI.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<InboxView> {
        self.view_tx.subscribe()
    }

    /// Copy of the current view.
    #[must_use]
    pub fn current_view(&self) -> InboxView {
        self.view_tx.borrow().clone()
    }

    /// Republish the view if it differs from the last one.
    fn publish(&self, state: &EngineState<C>) {
        let next = state.view();
        self.view_tx.send_if_modified(|current| {
            if current.same_as(&next) {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Open the conversation with `partner`.
    ///
    /// Shows the cached thread at once, then fetches the authoritative copy,
    /// marks it read and refreshes the roster.
    pub async fn select_contact(&self, partner: &UserId) {
        {
            let mut state = self.state.lock().await;
            if !state.is_open(partner) {
                state.typing.stop();
                state.partner_typing = false;
            }
            state.active = Some(partner.clone());

            let source = state.store.load(partner);
            let known = state.store.messages(partner).to_vec();
            if source != LoadSource::Memory {
                state.receipts.initialize_from_thread(&known);
            }
            state.sync.observe_messages(partner, &known);
            state.roster.mark_opened(partner);
            self.publish(&state);
            tracing::debug!(partner = %partner, ?source, "conversation opened");
        }

        self.refresh_thread(partner).await;
        self.mark_read(partner).await;
    }

    /// Update the draft and drive the outbound typing signal.
    pub async fn on_input_change(&self, text: &str) {
        let mut state = self.state.lock().await;
        state.draft = text.to_string();
        if let Some(partner) = state.active.clone() {
            state.typing.on_input(&partner, text);
        }
        self.publish(&state);
    }

    /// Switch roster context, invalidating the previous context's snapshot.
    pub async fn set_context(&self, context: RosterContext) {
        {
            let mut state = self.state.lock().await;
            if state.roster.context() == &context {
                return;
            }
            let previous = state.roster.set_context(context.clone());
            self.cache.invalidate_roster(&previous);
            if let Some(cached) = self.cache.load_roster(&context) {
                state.roster.restore(cached);
            }
            self.publish(&state);
            tracing::info!(from = %previous, to = %context, "roster context changed");
        }
        self.refresh_roster().await;
    }

    /// Re-fetch contacts and conversation metadata for the current context.
    pub async fn refresh_roster(&self) {
        let context = self.state.lock().await.roster.context().clone();
        let (profiles, conversations) = tokio::join!(
            self.api.fetch_contacts(&context),
            self.api.fetch_conversations()
        );
        let (profiles, conversations) = match (profiles, conversations) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => {
                log_fetch_failure("roster", &e);
                return;
            }
        };

        let mut state = self.state.lock().await;
        if state.roster.context() != &context {
            tracing::debug!(stale = %context, "discarding roster for previous context");
            return;
        }
        if state.roster.replace(profiles, &conversations) {
            self.cache.store_roster(&context, state.roster.contacts());
            self.publish(&state);
        }
    }

    /// The host surface was hidden or shown again.
    ///
    /// On return to visibility the open conversation is synced over the
    /// live channel and re-fetched over REST, and the roster refreshed.
    pub async fn on_visibility_change(&self, visible: bool) {
        let active = {
            let mut state = self.state.lock().await;
            state.visible = visible;
            if !visible {
                return;
            }
            let active = state.active.clone();
            if let Some(partner) = &active {
                state.sync.request(&self.signals, partner, SyncTrigger::Visible);
            }
            active
        };
        if let Some(partner) = active {
            self.refresh_thread(&partner).await;
        }
        self.refresh_roster().await;
    }

    /// Clear the failure notice.
    pub async fn dismiss_notice(&self) {
        let mut state = self.state.lock().await;
        if state.notice.take().is_some() {
            self.publish(&state);
        }
    }

    /// Highest sequence seen for `partner`.
    pub async fn last_seen(&self, partner: &UserId) -> SequenceNumber {
        self.state.lock().await.sync.last_seen(partner)
    }

    /// Fetch the thread with `partner` over REST and merge it.
    async fn refresh_thread(&self, partner: &UserId) {
        let page = match self.api.fetch_thread(partner).await {
            Ok(page) => page,
            Err(e) => {
                log_fetch_failure("thread", &e);
                return;
            }
        };

        let mut state = self.state.lock().await;
        if let Some(id) = &page.conversation_id {
            state.store.adopt_conversation_id(partner, id);
        }
        let mut changed = state.store.merge(partner, &page.messages);
        changed |= state.receipts.initialize_from_thread(&page.messages);
        state.sync.observe_messages(partner, &page.messages);
        state.sync.observe(partner, page.current_sequence);
        if changed {
            self.publish(&state);
        }
    }

    /// Tell the backend the thread was read, then refresh the roster.
    async fn mark_read(&self, partner: &UserId) {
        if let Err(e) = self.api.mark_thread_read(partner).await {
            log_fetch_failure("mark read", &e);
        }
        self.refresh_roster().await;
    }
}

/// Fetch failures never reach the UI; rate limiting is logged quietly.
fn log_fetch_failure(what: &str, error: &ApiError) {
    if error.is_rate_limited() {
        tracing::debug!(what, "rate limited during background refresh");
    } else {
        tracing::warn!(what, err = %error, "background fetch failed, keeping current view");
    }
}
