//! Direct-message types shared by the REST client, the live channel, and the
//! local cache.
//!
//! Identifiers are opaque string tokens issued by the backend. The only
//! identifiers minted on the client are temporary message ids, which live
//! exclusively inside the send pipeline until the server confirms a write.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum message body length in characters.
pub const MAX_BODY_LEN: usize = 4000;

/// Prefix carried by every client-minted temporary message id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Identifier of a message.
///
/// Server-assigned ids are arbitrary non-empty strings. Temporary ids are
/// `temp-<uuid v7>` and never appear in server frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-assigned message id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh temporary id for an optimistic entry.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id was minted locally and is awaiting server confirmation.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a user (the current user, a contact, a conversation partner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user id token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a server-side conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps a conversation id token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Server-assigned, per-conversation, strictly increasing message counter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The value before any message has been observed.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw sequence value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery lifecycle of a single message as seen by its sender.
///
/// The variants are ordered: a status may only ever move to a greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// Accepted by the server.
    Sent,
    /// Reached the recipient's client.
    Delivered,
    /// Opened by the recipient.
    Read,
}

impl ReceiptStatus {
    /// Derives the status implied by a fetched message's timestamps.
    ///
    /// A read timestamp wins outright, skipping `Delivered`.
    #[must_use]
    pub const fn from_message(message: &Message) -> Self {
        if message.read_at.is_some() {
            Self::Read
        } else if message.delivered_at.is_some() {
            Self::Delivered
        } else {
            Self::Sent
        }
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// One direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identity (temporary until the server confirms the write).
    pub id: MessageId,
    /// Conversation the message belongs to; unknown on an optimistic entry
    /// created before the thread was first fetched.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Body text.
    #[serde(rename = "content")]
    pub body: String,
    /// Creation instant.
    pub created_at: Timestamp,
    /// When the recipient read the message.
    #[serde(default)]
    pub read_at: Option<Timestamp>,
    /// When the message reached the recipient's client.
    #[serde(default)]
    pub delivered_at: Option<Timestamp>,
    /// Server-assigned sequence number; absent on optimistic copies.
    #[serde(default)]
    pub sequence: Option<SequenceNumber>,
}

/// Error returned when a message or outgoing body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Body is empty after trimming.
    #[error("message body is empty")]
    Empty,
    /// Body exceeds the maximum length.
    #[error("message too long ({len} characters, max {max})")]
    TooLong {
        /// Length of the trimmed body in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
    /// A required identifier is empty.
    #[error("missing identifier: {0}")]
    MissingId(&'static str),
    /// A server frame carried a client-side temporary id.
    #[error("server frame carries temporary id {0}")]
    TemporaryId(MessageId),
}

/// Trims an outgoing body and checks it against `max` characters.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank input and
/// [`ValidationError::TooLong`] when the trimmed text exceeds `max`.
pub fn validate_body(text: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { len, max });
    }
    Ok(trimmed.to_string())
}

impl Message {
    /// Builds the optimistic local copy of an outgoing message.
    #[must_use]
    pub fn optimistic(sender_id: UserId, receiver_id: UserId, body: String) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id: None,
            sender_id,
            receiver_id,
            body,
            created_at: Timestamp::now(),
            read_at: None,
            delivered_at: None,
            sequence: None,
        }
    }

    /// Returns the conversation partner from the point of view of `me`.
    #[must_use]
    pub fn partner_of(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether `user` is one of the two participants.
    #[must_use]
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// Display order: creation time, then sequence number. Entries without
    /// a sequence sort after sequenced entries stamped at the same instant.
    #[must_use]
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.created_at.cmp(&other.created_at).then_with(|| {
            match (self.sequence, other.sequence) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
    }

    /// Pairwise equality used to suppress redundant view updates: identity,
    /// body, timestamps, and participants.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.body == other.body
            && self.created_at == other.created_at
            && self.read_at == other.read_at
            && self.delivered_at == other.delivered_at
            && self.sequence == other.sequence
            && self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
    }

    /// Folds later knowledge about the same message into this entry.
    ///
    /// Body and creation time stay first-seen. Sequence, conversation id,
    /// and read/delivered timestamps are filled in but never cleared.
    /// Returns `true` if anything changed.
    pub fn absorb(&mut self, newer: &Self) -> bool {
        let mut changed = false;
        if self.sequence.is_none() && newer.sequence.is_some() {
            self.sequence = newer.sequence;
            changed = true;
        }
        if self.conversation_id.is_none() && newer.conversation_id.is_some() {
            self.conversation_id.clone_from(&newer.conversation_id);
            changed = true;
        }
        if self.read_at.is_none() && newer.read_at.is_some() {
            self.read_at = newer.read_at;
            changed = true;
        }
        if self.delivered_at.is_none() && newer.delivered_at.is_some() {
            self.delivered_at = newer.delivered_at;
            changed = true;
        }
        changed
    }

    /// Checks a message that arrived from the server.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if an identifier is empty or the id is a
    /// client-side temporary id.
    pub fn validate_inbound(&self) -> Result<(), ValidationError> {
        if self.id.as_str().is_empty() {
            return Err(ValidationError::MissingId("id"));
        }
        if self.id.is_temporary() {
            return Err(ValidationError::TemporaryId(self.id.clone()));
        }
        if self.sender_id.as_str().is_empty() {
            return Err(ValidationError::MissingId("senderId"));
        }
        if self.receiver_id.as_str().is_empty() {
            return Err(ValidationError::MissingId("receiverId"));
        }
        Ok(())
    }
}
