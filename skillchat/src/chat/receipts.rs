//! Per-message receipt status.
//!
//! Statuses only move forward (`sent < delivered < read`). A receipt for an
//! id the tracker has not seen is kept, because the backend may acknowledge
//! a message before the send call that created it has returned.

use std::collections::HashMap;

use skillchat_proto::message::{Message, MessageId, ReceiptStatus};

/// Map from message id to its receipt status.
#[derive(Debug, Default, Clone)]
pub struct ReceiptTracker {
    statuses: HashMap<MessageId, ReceiptStatus>,
}

impl ReceiptTracker {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed statuses from fetched messages' read/delivered timestamps.
    ///
    /// Returns `true` if any status changed.
    pub fn initialize_from_thread(&mut self, messages: &[Message]) -> bool {
        let mut changed = false;
        for message in messages {
            changed |= self.apply_receipt(&message.id, ReceiptStatus::from_message(message));
        }
        changed
    }

    /// Monotonic update. Returns `true` if the status advanced.
    pub fn apply_receipt(&mut self, id: &MessageId, status: ReceiptStatus) -> bool {
        match self.statuses.get_mut(id) {
            Some(current) if *current >= status => {
                if *current > status {
                    tracing::debug!(message_id = %id, %current, rejected = %status, "ignoring receipt regression");
                }
                false
            }
            Some(current) => {
                *current = status;
                true
            }
            None => {
                self.statuses.insert(id.clone(), status);
                true
            }
        }
    }

    /// Record a freshly created optimistic entry as `sent`.
    pub fn track_sent(&mut self, id: &MessageId) {
        self.apply_receipt(id, ReceiptStatus::Sent);
    }

    /// Move the entry for `temp` to `real` once the server confirmed the
    /// write. A status that already arrived for `real` is kept if higher.
    pub fn migrate(&mut self, temp: &MessageId, real: &MessageId) {
        let carried = self.statuses.remove(temp).unwrap_or(ReceiptStatus::Sent);
        self.apply_receipt(real, carried);
    }

    /// Drop the entry for a rolled-back optimistic message.
    pub fn forget(&mut self, id: &MessageId) {
        self.statuses.remove(id);
    }

    /// Current status of `id`.
    #[must_use]
    pub fn status(&self, id: &MessageId) -> Option<ReceiptStatus> {
        self.statuses.get(id).copied()
    }

    /// Copy of the whole map, for publishing to the view.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<MessageId, ReceiptStatus> {
        self.statuses.clone()
    }
}
