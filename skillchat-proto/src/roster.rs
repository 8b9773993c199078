//! Contact roster types.
//!
//! The backend supplies two independent lists: the contacts a user may
//! message in the current context ([`ContactProfile`]), and the user's
//! existing conversations with their metadata ([`ConversationSummary`]).
//! The client joins them into [`Contact`] entries.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Timestamp, UserId};

/// Identifies the set of contacts eligible for messaging, e.g. one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterContext(String);

impl RosterContext {
    /// Context key used when no narrower scope is selected.
    pub const ALL: &'static str = "all";

    /// Wraps a context key such as a class id.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The unscoped context.
    #[must_use]
    pub fn all() -> Self {
        Self(Self::ALL.to_string())
    }

    /// Returns the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RosterContext {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Display for RosterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user the current user may message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactProfile {
    /// User id.
    pub id: UserId,
    /// Name shown in the contact list.
    pub display_name: String,
    /// Role label (`instructor`, `student`, `admin`).
    #[serde(default)]
    pub role: Option<String>,
    /// Avatar location.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Summary of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    /// Body text.
    pub text: String,
    /// Creation time.
    pub at: Timestamp,
    /// Whether the current user wrote it.
    pub from_me: bool,
    /// Whether the recipient has read it.
    pub read: bool,
}

/// Conversation metadata as returned by the conversations endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The other participant.
    pub partner_id: UserId,
    /// Server conversation id.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Latest message, if any.
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Messages from the partner not yet read by the current user.
    #[serde(default)]
    pub unread_count: u32,
}

/// One entry of the aggregated contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Display attributes.
    pub profile: ContactProfile,
    /// Latest message, if a conversation exists.
    pub last_message: Option<LastMessage>,
    /// Unread messages from this contact.
    pub unread_count: u32,
    /// Advisory presence flag pushed by the server.
    pub online: bool,
}

impl Contact {
    /// A contact with no conversation yet.
    #[must_use]
    pub const fn new(profile: ContactProfile) -> Self {
        Self {
            profile,
            last_message: None,
            unread_count: 0,
            online: false,
        }
    }

    /// Returns the contact's user id.
    #[must_use]
    pub const fn id(&self) -> &UserId {
        &self.profile.id
    }
}
