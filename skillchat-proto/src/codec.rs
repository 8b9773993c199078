//! JSON encoding and boundary validation for live-channel frames.
//!
//! Decoding is the only way a [`ServerEvent`] enters the engine, so every
//! structural check happens here: unknown tags and missing fields are
//! rejected by serde, and the semantic checks in [`validate`] reject frames
//! that parse but cannot be trusted.

use crate::event::{ClientSignal, ServerEvent};
use crate::message::{ReceiptStatus, ValidationError};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON for any known variant.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame parsed but failed validation.
    #[error("invalid frame: {0}")]
    Invalid(#[from] ValidationError),
    /// A receipt tried to report the initial `sent` state.
    #[error("receipt for {0} carries status `sent`")]
    SentReceipt(String),
    /// Serialization of an outbound signal failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes an outbound signal as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the signal cannot be serialized.
pub fn encode_signal(signal: &ClientSignal) -> Result<String, CodecError> {
    serde_json::to_string(signal).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes and validates an inbound frame.
///
/// # Errors
///
/// Returns `CodecError::Malformed` for unparseable input and
/// `CodecError::Invalid` / `CodecError::SentReceipt` for frames that fail
/// [`validate`].
pub fn decode_event(frame: &str) -> Result<ServerEvent, CodecError> {
    let event: ServerEvent =
        serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate(&event)?;
    Ok(event)
}

/// Encodes an inbound event; used by test doubles that play the backend.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_event(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Semantic checks applied to every decoded event.
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first violation found.
pub fn validate(event: &ServerEvent) -> Result<(), CodecError> {
    match event {
        ServerEvent::NewMessage { message } => message.validate_inbound()?,
        ServerEvent::DeliveryReceipt { message_id, status } => {
            if message_id.as_str().is_empty() {
                return Err(ValidationError::MissingId("messageId").into());
            }
            if message_id.is_temporary() {
                return Err(ValidationError::TemporaryId(message_id.clone()).into());
            }
            if *status == ReceiptStatus::Sent {
                return Err(CodecError::SentReceipt(message_id.to_string()));
            }
        }
        ServerEvent::SyncResponse {
            partner_id,
            messages,
            ..
        } => {
            if partner_id.as_str().is_empty() {
                return Err(ValidationError::MissingId("partnerId").into());
            }
            for message in messages {
                message.validate_inbound()?;
            }
        }
        ServerEvent::TypingStart { sender_id } | ServerEvent::TypingStop { sender_id } => {
            if sender_id.as_str().is_empty() {
                return Err(ValidationError::MissingId("senderId").into());
            }
        }
        ServerEvent::PresenceChange { user_id, .. } => {
            if user_id.as_str().is_empty() {
                return Err(ValidationError::MissingId("userId").into());
            }
        }
    }
    Ok(())
}
