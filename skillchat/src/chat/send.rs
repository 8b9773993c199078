//! Send pipeline methods for [`InboxEngine`].
//!
//! A send shows an optimistic entry immediately, calls the REST endpoint,
//! and then either swaps the entry for the server's copy in the same slot
//! or rolls it back and hands the text back to the input. Only one send
//! may be in flight per engine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use skillchat_proto::message::{Message, ReceiptStatus, ValidationError, validate_body};

use crate::api::{ApiError, ChatApi};
use crate::cache::CachePort;

use super::{InboxEngine, Notice};

/// Why a send failed, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The session expired; sign in again.
    #[error("session expired")]
    AuthExpired,
    /// The recipient no longer exists or is not reachable.
    #[error("recipient not found")]
    RecipientNotFound,
    /// The body was rejected locally or by the backend.
    #[error("invalid message: {0}")]
    Validation(String),
    /// Too many requests; try again shortly.
    #[error("rate limited")]
    RateLimited,
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<ApiError> for SendFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => Self::AuthExpired,
            ApiError::NotFound => Self::RecipientNotFound,
            ApiError::RateLimited => Self::RateLimited,
            ApiError::Validation(detail) => Self::Validation(detail),
            other @ (ApiError::Server(_) | ApiError::Transport(_) | ApiError::Decode(_)) => {
                Self::Other(other.to_string())
            }
        }
    }
}

/// Why a send request was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Blank input.
    Empty,
    /// Another send has not finished.
    InFlight,
    /// No conversation is open.
    NoActiveContact,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty message"),
            Self::InFlight => f.write_str("a send is already in progress"),
            Self::NoActiveContact => f.write_str("no conversation open"),
        }
    }
}

/// Result of [`InboxEngine::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server stored the message; this is its authoritative copy.
    Sent(Message),
    /// Nothing was sent and nothing changed.
    Ignored(IgnoreReason),
    /// The send failed and the optimistic entry was rolled back.
    Failed {
        /// What went wrong.
        reason: SendFailure,
        /// The original input, restored to the draft.
        draft: String,
    },
}

/// Holds the single in-flight slot until dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A: ChatApi, C: CachePort> InboxEngine<A, C> {
    /// Whether a send is awaiting the server.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Send `text` to the open conversation.
    ///
    /// Steps:
    /// 1. Trim and validate the body against the configured maximum.
    /// 2. Claim the in-flight slot, append an optimistic entry with a
    ///    temporary id and receipt `sent`, and clear the draft.
    /// 3. Call the REST endpoint without holding the state lock.
    /// 4. On success, replace the optimistic entry in place, migrate its
    ///    receipt, stop typing and refresh the roster.
    /// 5. On failure, remove the entry, restore the draft and raise a
    ///    notice.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let body = match validate_body(text, self.config.max_body_len) {
            Ok(body) => body,
            Err(ValidationError::Empty) => return SendOutcome::Ignored(IgnoreReason::Empty),
            Err(e) => return self.reject_locally(text, &e).await,
        };

        let Some(guard) = InFlightGuard::acquire(&self.sending) else {
            tracing::debug!("send ignored, previous send still in flight");
            return SendOutcome::Ignored(IgnoreReason::InFlight);
        };

        let (partner, temp_id) = {
            let mut state = self.state.lock().await;
            let Some(partner) = state.active.clone() else {
                return SendOutcome::Ignored(IgnoreReason::NoActiveContact);
            };
            let mut optimistic = Message::optimistic(self.me.clone(), partner.clone(), body.clone());
            optimistic.conversation_id = state
                .store
                .conversation(&partner)
                .and_then(|c| c.conversation_id.clone());
            let temp_id = optimistic.id.clone();

            state.store.append(&partner, optimistic);
            state.receipts.track_sent(&temp_id);
            state.draft.clear();
            state.notice = None;
            self.publish(&state);
            (partner, temp_id)
        };

        tracing::debug!(partner = %partner, temp_id = %temp_id, "sending message");
        let result = self.api.send_message(&partner, &body).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(real) => {
                state.store.replace(&partner, &temp_id, real.clone());
                state.receipts.migrate(&temp_id, &real.id);
                state
                    .receipts
                    .apply_receipt(&real.id, ReceiptStatus::from_message(&real));
                if let Some(seq) = real.sequence {
                    state.sync.observe(&partner, seq);
                }
                state.roster.note_message(&partner, &real, &self.me, false);
                state.typing.send_completed(&partner);
                self.publish(&state);
                drop(state);
                drop(guard);

                tracing::info!(partner = %partner, message_id = %real.id, "message sent");
                self.refresh_roster().await;
                SendOutcome::Sent(real)
            }
            Err(e) => {
                let reason = SendFailure::from(e);
                tracing::warn!(partner = %partner, err = %reason, "send failed, rolling back");

                state.store.remove(&partner, &temp_id);
                state.receipts.forget(&temp_id);
                if state.is_open(&partner) && state.draft.trim().is_empty() {
                    state.draft = text.to_string();
                }
                state.notice = Some(Notice {
                    partner: partner.clone(),
                    reason: reason.clone(),
                });
                state.typing.send_completed(&partner);
                self.publish(&state);

                SendOutcome::Failed {
                    reason,
                    draft: text.to_string(),
                }
            }
        }
    }

    /// A body that fails local validation never reaches the network.
    async fn reject_locally(&self, text: &str, error: &ValidationError) -> SendOutcome {
        let reason = SendFailure::Validation(error.to_string());
        let mut state = self.state.lock().await;
        if let Some(partner) = state.active.clone() {
            state.notice = Some(Notice {
                partner,
                reason: reason.clone(),
            });
            self.publish(&state);
        }
        SendOutcome::Failed {
            reason,
            draft: text.to_string(),
        }
    }
}
