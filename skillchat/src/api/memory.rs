//! In-process backend implementing [`ChatApi`] for tests.
//!
//! Keeps per-partner threads with their own sequence counters, so a test can
//! deliver messages "while the client is offline" and later check that the
//! engine backfills them. Sends can be held open to exercise the in-flight
//! guard, and failures can be scripted per call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use skillchat_proto::message::{
    ConversationId, Message, MessageId, SequenceNumber, Timestamp, UserId,
};
use skillchat_proto::roster::{ContactProfile, ConversationSummary, LastMessage, RosterContext};

use super::{ApiError, ChatApi, ThreadPage};

/// A REST call observed by [`InMemoryChatApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `GET /messages/contacts`.
    Contacts(RosterContext),
    /// `GET /messages/conversations`.
    Conversations,
    /// `GET /messages/thread/<partner>`.
    Thread(UserId),
    /// `PUT /messages/thread/<partner>/read`.
    MarkRead(UserId),
    /// `POST /messages`.
    Send(UserId),
}

#[derive(Default)]
struct Thread {
    conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    sequence: u64,
    unread: u32,
}

#[derive(Default)]
struct Backend {
    contacts: HashMap<RosterContext, Vec<ContactProfile>>,
    threads: HashMap<UserId, Thread>,
    send_failures: VecDeque<ApiError>,
    fetch_failure: Option<ApiError>,
    calls: Vec<ApiCall>,
    next_id: u64,
    last_stamp: u64,
}

impl Backend {
    fn stamp(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.last_stamp + 1);
        self.last_stamp = now;
        Timestamp::from_millis(now)
    }

    fn create(&mut self, sender: &UserId, receiver: &UserId, partner: &UserId, body: &str) -> Message {
        self.next_id += 1;
        let id = MessageId::new(format!("m{}", self.next_id));
        let created_at = self.stamp();
        let thread = self.threads.entry(partner.clone()).or_default();
        thread.sequence += 1;
        let conversation_id = thread
            .conversation_id
            .get_or_insert_with(|| ConversationId::new(format!("c-{partner}")))
            .clone();
        let message = Message {
            id,
            conversation_id: Some(conversation_id),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            body: body.to_string(),
            created_at,
            read_at: None,
            delivered_at: None,
            sequence: Some(SequenceNumber::new(thread.sequence)),
        };
        thread.messages.push(message.clone());
        message
    }
}

/// Simulated backend for one signed-in user.
pub struct InMemoryChatApi {
    me: UserId,
    state: Mutex<Backend>,
    send_gate: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryChatApi {
    /// A backend serving `me`.
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            state: Mutex::new(Backend::default()),
            send_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Make `profile` eligible in `context`.
    pub fn add_contact(&self, context: &RosterContext, profile: ContactProfile) {
        self.state
            .lock()
            .contacts
            .entry(context.clone())
            .or_default()
            .push(profile);
    }

    /// Record a message from `partner` to the current user, as if the
    /// partner had sent it. Returns the authoritative copy.
    pub fn deliver_from(&self, partner: &UserId, body: &str) -> Message {
        let mut state = self.state.lock();
        let message = state.create(partner, &self.me, partner, body);
        if let Some(thread) = state.threads.get_mut(partner) {
            thread.unread += 1;
        }
        message
    }

    /// Create an empty conversation with `partner`, as the backend does when
    /// a course enrolls both users. Returns its id.
    pub fn open_conversation(&self, partner: &UserId) -> ConversationId {
        let mut state = self.state.lock();
        let thread = state.threads.entry(partner.clone()).or_default();
        thread
            .conversation_id
            .get_or_insert_with(|| ConversationId::new(format!("c-{partner}")))
            .clone()
    }

    /// Mark every message the current user sent to `partner` as read by
    /// the partner.
    pub fn partner_reads(&self, partner: &UserId) {
        let mut state = self.state.lock();
        let now = state.stamp();
        if let Some(thread) = state.threads.get_mut(partner) {
            for message in &mut thread.messages {
                if message.sender_id == self.me && message.read_at.is_none() {
                    message.read_at = Some(now);
                }
            }
        }
    }

    /// Fail the next send with `error`.
    pub fn fail_next_send(&self, error: ApiError) {
        self.state.lock().send_failures.push_back(error);
    }

    /// Fail every fetch with `error` until cleared with `None`.
    pub fn fail_fetches(&self, error: Option<ApiError>) {
        self.state.lock().fetch_failure = error;
    }

    /// Block sends until the returned guard is dropped.
    pub async fn hold_sends(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.send_gate).lock_owned().await
    }

    /// Calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Number of observed calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &ApiCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// The authoritative thread with `partner`.
    #[must_use]
    pub fn thread(&self, partner: &UserId) -> Vec<Message> {
        self.state
            .lock()
            .threads
            .get(partner)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    fn begin_fetch(&self, call: ApiCall) -> Result<parking_lot::MutexGuard<'_, Backend>, ApiError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.fetch_failure.clone() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

impl ChatApi for InMemoryChatApi {
    async fn fetch_contacts(&self, context: &RosterContext) -> Result<Vec<ContactProfile>, ApiError> {
        let state = self.begin_fetch(ApiCall::Contacts(context.clone()))?;
        Ok(state.contacts.get(context).cloned().unwrap_or_default())
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let state = self.begin_fetch(ApiCall::Conversations)?;
        let summaries = state
            .threads
            .iter()
            .map(|(partner, thread)| ConversationSummary {
                partner_id: partner.clone(),
                conversation_id: thread.conversation_id.clone(),
                last_message: thread.messages.last().map(|m| LastMessage {
                    text: m.body.clone(),
                    at: m.created_at,
                    from_me: m.sender_id == self.me,
                    read: m.read_at.is_some(),
                }),
                unread_count: thread.unread,
            })
            .collect();
        Ok(summaries)
    }

    async fn fetch_thread(&self, partner: &UserId) -> Result<ThreadPage, ApiError> {
        let state = self.begin_fetch(ApiCall::Thread(partner.clone()))?;
        Ok(state
            .threads
            .get(partner)
            .map(|thread| ThreadPage {
                conversation_id: thread.conversation_id.clone(),
                messages: thread.messages.clone(),
                current_sequence: SequenceNumber::new(thread.sequence),
            })
            .unwrap_or_default())
    }

    async fn mark_thread_read(&self, partner: &UserId) -> Result<(), ApiError> {
        let mut state = self.begin_fetch(ApiCall::MarkRead(partner.clone()))?;
        let now = state.stamp();
        if let Some(thread) = state.threads.get_mut(partner) {
            thread.unread = 0;
            for message in &mut thread.messages {
                if message.receiver_id == self.me && message.read_at.is_none() {
                    message.read_at = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn send_message(&self, partner: &UserId, body: &str) -> Result<Message, ApiError> {
        let _gate = self.send_gate.lock().await;
        let mut state = self.state.lock();
        state.calls.push(ApiCall::Send(partner.clone()));
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        Ok(state.create(&self.me, partner, partner, body))
    }
}
