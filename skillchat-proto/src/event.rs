//! Live-channel frames.
//!
//! Every frame is a JSON object tagged by `"type"`. Inbound frames
//! ([`ServerEvent`]) carry pushes from the backend; outbound frames
//! ([`ClientSignal`]) are control-plane signals only. Chat content is never
//! written through the live channel.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, ReceiptStatus, SequenceNumber, UserId};

/// A frame pushed by the backend over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message was created in one of the current user's conversations.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        /// The authoritative message, including conversation id and sequence.
        message: Message,
    },
    /// A sent message reached a new receipt state.
    #[serde(rename_all = "camelCase")]
    DeliveryReceipt {
        /// The acknowledged message.
        message_id: MessageId,
        /// The new status (`delivered` or `read`).
        status: ReceiptStatus,
    },
    /// Backfill answering a [`ClientSignal::RequestSync`].
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        /// Partner whose conversation was requested.
        partner_id: UserId,
        /// Messages newer than the requested sequence.
        #[serde(default)]
        messages: Vec<Message>,
        /// The server's current sequence for the conversation.
        current_sequence: SequenceNumber,
    },
    /// A user started typing to the current user.
    #[serde(rename_all = "camelCase")]
    TypingStart {
        /// The typing user.
        sender_id: UserId,
    },
    /// A user stopped typing to the current user.
    #[serde(rename_all = "camelCase")]
    TypingStop {
        /// The user who stopped typing.
        sender_id: UserId,
    },
    /// A user's online state changed.
    #[serde(rename_all = "camelCase")]
    PresenceChange {
        /// The user whose presence changed.
        user_id: UserId,
        /// Whether the user is online.
        online: bool,
    },
}

/// Discriminant of [`ServerEvent`], used for typed subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ServerEvent::NewMessage`].
    NewMessage,
    /// [`ServerEvent::DeliveryReceipt`].
    DeliveryReceipt,
    /// [`ServerEvent::SyncResponse`].
    SyncResponse,
    /// [`ServerEvent::TypingStart`].
    TypingStart,
    /// [`ServerEvent::TypingStop`].
    TypingStop,
    /// [`ServerEvent::PresenceChange`].
    PresenceChange,
}

impl ServerEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage { .. } => EventKind::NewMessage,
            Self::DeliveryReceipt { .. } => EventKind::DeliveryReceipt,
            Self::SyncResponse { .. } => EventKind::SyncResponse,
            Self::TypingStart { .. } => EventKind::TypingStart,
            Self::TypingStop { .. } => EventKind::TypingStop,
            Self::PresenceChange { .. } => EventKind::PresenceChange,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NewMessage => "newMessage",
            Self::DeliveryReceipt => "deliveryReceipt",
            Self::SyncResponse => "syncResponse",
            Self::TypingStart => "typingStart",
            Self::TypingStop => "typingStop",
            Self::PresenceChange => "presenceChange",
        };
        f.write_str(name)
    }
}

/// A control signal sent by the client over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientSignal {
    /// The current user started typing to `partner_id`.
    #[serde(rename_all = "camelCase")]
    TypingStart {
        /// Target partner.
        partner_id: UserId,
    },
    /// The current user stopped typing to `partner_id`.
    #[serde(rename_all = "camelCase")]
    TypingStop {
        /// Target partner.
        partner_id: UserId,
    },
    /// Ask for every message in the conversation with `partner_id` newer
    /// than `last_sequence`.
    #[serde(rename_all = "camelCase")]
    RequestSync {
        /// Target partner.
        partner_id: UserId,
        /// Highest sequence the client has seen.
        last_sequence: SequenceNumber,
    },
}

impl ClientSignal {
    /// Returns the partner this signal is addressed to.
    #[must_use]
    pub const fn partner_id(&self) -> &UserId {
        match self {
            Self::TypingStart { partner_id }
            | Self::TypingStop { partner_id }
            | Self::RequestSync { partner_id, .. } => partner_id,
        }
    }
}
