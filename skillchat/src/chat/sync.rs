//! Gap recovery by sequence number.
//!
//! Tracks the highest sequence seen per partner. After a (re)connect, a
//! return to visibility or dropped live events, the engine asks the backend for everything newer
//! than that value and merges the answer; a REST refresh of the thread is
//! always issued alongside as a backstop, since either path may be stale.

use std::collections::HashMap;
use std::fmt;

use skillchat_proto::message::{Message, SequenceNumber, UserId};

use crate::transport::connection::SignalSender;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The live channel came (back) up.
    Connected,
    /// The UI became visible again.
    Visible,
    /// The driver fell behind the live channel and dropped events.
    Lagged,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Visible => f.write_str("visible"),
            Self::Lagged => f.write_str("lagged"),
        }
    }
}

/// Last-seen sequence per partner. Values never decrease.
#[derive(Debug, Default, Clone)]
pub struct SequenceSync {
    last_seen: HashMap<UserId, SequenceNumber>,
}

impl SequenceSync {
    /// Empty bookkeeping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence seen for `partner`.
    #[must_use]
    pub fn last_seen(&self, partner: &UserId) -> SequenceNumber {
        self.last_seen
            .get(partner)
            .copied()
            .unwrap_or(SequenceNumber::ZERO)
    }

    /// Adopt `seq` if it is newer. Returns `true` if the value advanced.
    pub fn observe(&mut self, partner: &UserId, seq: SequenceNumber) -> bool {
        let entry = self.last_seen.entry(partner.clone()).or_default();
        if seq > *entry {
            *entry = seq;
            true
        } else {
            false
        }
    }

    /// Adopt the highest sequence carried by `messages`.
    pub fn observe_messages(&mut self, partner: &UserId, messages: &[Message]) -> bool {
        messages
            .iter()
            .filter_map(|m| m.sequence)
            .max()
            .is_some_and(|seq| self.observe(partner, seq))
    }

    /// Ask the backend for everything with `partner` after the last-seen
    /// value. Returns `false` if the signal was dropped (link down).
    pub fn request(&self, signals: &SignalSender, partner: &UserId, trigger: SyncTrigger) -> bool {
        let since = self.last_seen(partner);
        let sent = signals.request_sync(partner, since);
        tracing::debug!(partner = %partner, %since, %trigger, sent, "requested sync");
        sent
    }
}
