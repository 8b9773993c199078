//! Receive pipeline methods for [`InboxEngine`].
//!
//! Live-channel events and connection-state changes are applied here. All
//! message-bearing events go through the same store merge as REST fetches.

use skillchat_proto::event::ServerEvent;
use skillchat_proto::message::{Message, UserId};

use crate::api::ChatApi;
use crate::cache::CachePort;
use crate::transport::connection::ChannelSubscription;
use crate::transport::{ChannelEvent, ConnectionState};

use super::InboxEngine;
use super::sync::SyncTrigger;

/// Follow-up network work decided while the state lock was held.
enum FollowUp {
    None,
    MarkRead(UserId),
    RefreshRoster,
    RefreshThread(UserId),
    Resync(Option<UserId>),
}

impl<A: ChatApi, C: CachePort> InboxEngine<A, C> {
    /// Apply events from `subscription` until the connection manager shuts
    /// down.
    pub async fn run(&self, mut subscription: ChannelSubscription) {
        while let Some(event) = subscription.recv().await {
            self.handle_event(event).await;
        }
        tracing::debug!("live subscription closed, engine driver exiting");
    }

    /// Apply one live-channel event.
    pub async fn handle_event(&self, event: ChannelEvent) {
        let follow_up = match event {
            ChannelEvent::Server(event) => self.apply_server_event(event).await,
            ChannelEvent::State(state) => self.apply_connection_state(state).await,
            ChannelEvent::Lagged(skipped) => self.recover_from_lag(skipped).await,
        };

        match follow_up {
            FollowUp::None => {}
            FollowUp::MarkRead(partner) => self.mark_read(&partner).await,
            FollowUp::RefreshRoster => self.refresh_roster().await,
            FollowUp::RefreshThread(partner) => self.refresh_thread(&partner).await,
            FollowUp::Resync(partner) => {
                if let Some(partner) = partner {
                    self.refresh_thread(&partner).await;
                }
                self.refresh_roster().await;
            }
        }
    }

    async fn apply_server_event(&self, event: ServerEvent) -> FollowUp {
        let mut state = self.state.lock().await;
        match event {
            ServerEvent::NewMessage { message } => {
                if !message.involves(&self.me) {
                    tracing::warn!(message_id = %message.id, "dropping message addressed to another user");
                    return FollowUp::None;
                }
                let partner = message.partner_of(&self.me).clone();
                let from_partner = message.sender_id == partner;
                let on_screen = state.is_open(&partner) && state.visible;

                state.store.load(&partner);
                let mut changed = state.store.append(&partner, message.clone());
                changed |= state.receipts.initialize_from_thread(std::slice::from_ref(&message));
                if let Some(seq) = message.sequence {
                    state.sync.observe(&partner, seq);
                }
                changed |= state
                    .roster
                    .note_message(&partner, &message, &self.me, from_partner && !on_screen);
                if from_partner && state.is_open(&partner) && state.partner_typing {
                    state.partner_typing = false;
                    changed = true;
                }
                if changed {
                    self.publish(&state);
                }
                log_arrival(&partner, &message);

                if from_partner && on_screen {
                    FollowUp::MarkRead(partner)
                } else {
                    FollowUp::RefreshRoster
                }
            }
            ServerEvent::DeliveryReceipt { message_id, status } => {
                if state.receipts.apply_receipt(&message_id, status) {
                    self.publish(&state);
                }
                FollowUp::None
            }
            ServerEvent::SyncResponse {
                partner_id,
                messages,
                current_sequence,
            } => {
                if !state.is_open(&partner_id) {
                    tracing::debug!(partner = %partner_id, "ignoring sync response for closed conversation");
                    return FollowUp::None;
                }
                let mut changed = state.store.merge(&partner_id, &messages);
                changed |= state.receipts.initialize_from_thread(&messages);
                state.sync.observe_messages(&partner_id, &messages);
                state.sync.observe(&partner_id, current_sequence);
                tracing::debug!(
                    partner = %partner_id,
                    count = messages.len(),
                    %current_sequence,
                    "applied sync response"
                );
                if changed {
                    self.publish(&state);
                }
                FollowUp::None
            }
            ServerEvent::TypingStart { sender_id } => {
                self.set_partner_typing(&mut state, &sender_id, true);
                FollowUp::None
            }
            ServerEvent::TypingStop { sender_id } => {
                self.set_partner_typing(&mut state, &sender_id, false);
                FollowUp::None
            }
            ServerEvent::PresenceChange { user_id, online } => {
                if state.roster.apply_presence(&user_id, online) {
                    self.publish(&state);
                }
                FollowUp::None
            }
        }
    }

    /// Dropped events may have carried messages, receipts or state changes.
    /// Re-read the connection state, then sync and refetch the open thread
    /// and the roster.
    async fn recover_from_lag(&self, skipped: u64) -> FollowUp {
        let mut state = self.state.lock().await;
        tracing::warn!(skipped, "live events dropped, resyncing");
        state.connection = self.signals.connection_state();
        if !state.connection.is_connected() {
            state.partner_typing = false;
        }
        self.publish(&state);

        let active = state.active.clone();
        if let Some(partner) = &active {
            state.sync.request(&self.signals, partner, SyncTrigger::Lagged);
        }
        FollowUp::Resync(active)
    }

    fn set_partner_typing(&self, state: &mut super::EngineState<C>, sender: &UserId, typing: bool) {
        if state.is_open(sender) && state.partner_typing != typing {
            state.partner_typing = typing;
            self.publish(state);
        }
    }

    async fn apply_connection_state(&self, connection: ConnectionState) -> FollowUp {
        let mut state = self.state.lock().await;
        state.connection = connection;
        if !connection.is_connected() {
            state.partner_typing = false;
        }
        self.publish(&state);

        match (connection, state.active.clone()) {
            (ConnectionState::Connected, Some(partner)) => {
                state
                    .sync
                    .request(&self.signals, &partner, SyncTrigger::Connected);
                FollowUp::RefreshThread(partner)
            }
            _ => FollowUp::None,
        }
    }
}

fn log_arrival(partner: &UserId, message: &Message) {
    tracing::debug!(
        partner = %partner,
        message_id = %message.id,
        sequence = ?message.sequence,
        "live message"
    );
}
