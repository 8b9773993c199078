//! REST port to the LMS messaging endpoints.
//!
//! [`ChatApi`] is the data plane: every chat message is written through
//! [`ChatApi::send_message`], never through the live channel. Two
//! implementations ship with the crate:
//! - [`http::HttpChatApi`]: `reqwest` against the backend
//! - [`memory::InMemoryChatApi`]: an in-process backend for tests

pub mod http;
pub mod memory;

use serde::{Deserialize, Serialize};
use skillchat_proto::message::{ConversationId, Message, SequenceNumber, UserId};
use skillchat_proto::roster::{ContactProfile, ConversationSummary, RosterContext};

/// Errors returned by REST calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The session credential was rejected (HTTP 401).
    #[error("session expired or unauthorized")]
    Unauthorized,

    /// The addressed resource does not exist (HTTP 404).
    #[error("not found")]
    NotFound,

    /// The backend is throttling this client (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// The request was rejected as invalid (HTTP 400/422).
    #[error("rejected by server: {0}")]
    Validation(String),

    /// Any other non-success status.
    #[error("server error (HTTP {0})")]
    Server(u16),

    /// The request never completed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response body did not match the expected schema.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether this is a throttling response, logged quietly during
    /// passive refreshes.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// One fetched thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    /// Server conversation id; absent when no message was exchanged yet.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Messages in server order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// The conversation's current sequence.
    #[serde(default)]
    pub current_sequence: SequenceNumber,
}

/// Body of the send endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Recipient.
    pub receiver_id: UserId,
    /// Message body.
    pub content: String,
}

/// Authenticated REST calls the engine depends on.
pub trait ChatApi: Send + Sync + 'static {
    /// Contacts the current user may message in `context`.
    fn fetch_contacts(
        &self,
        context: &RosterContext,
    ) -> impl std::future::Future<Output = Result<Vec<ContactProfile>, ApiError>> + Send;

    /// The current user's conversations with last-message and unread
    /// metadata.
    fn fetch_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// Full thread with `partner`.
    fn fetch_thread(
        &self,
        partner: &UserId,
    ) -> impl std::future::Future<Output = Result<ThreadPage, ApiError>> + Send;

    /// Mark every message from `partner` as read.
    fn mark_thread_read(
        &self,
        partner: &UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Create a message; returns the authoritative copy with its server id
    /// and sequence number.
    fn send_message(
        &self,
        partner: &UserId,
        body: &str,
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;
}
