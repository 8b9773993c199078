//! Supervisor for the single live-channel connection.
//!
//! [`ConnectionManager::connect`] spawns one task that dials, pumps frames in
//! both directions, and redials with exponential backoff when the link
//! drops. Consumers observe it three ways:
//!
//! - [`ConnectionManager::connection_state`]: a `watch` of the current state
//! - [`ConnectionManager::on`]: a typed subscription to one [`EventKind`]
//! - [`ConnectionManager::subscribe`]: every [`ChannelEvent`], for the engine
//!   driver
//!
//! Outbound signals go through a [`SignalSender`], which drops them while the
//! link is down. Signals are ephemeral; queueing them across a reconnect
//! would deliver stale typing state.

use std::sync::Arc;

use parking_lot::Mutex;
use skillchat_proto::codec;
use skillchat_proto::event::{ClientSignal, EventKind, ServerEvent};
use skillchat_proto::message::{SequenceNumber, UserId};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{ChannelEvent, ConnectionState, Dialer, FrameSink, FrameStream};
use crate::config::ReconnectConfig;

/// Outbound signal queue depth. Signals beyond this are dropped.
const SIGNAL_QUEUE: usize = 32;

/// Clonable handle for writing control signals to the live channel.
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<ClientSignal>,
    state: watch::Receiver<ConnectionState>,
}

impl SignalSender {
    /// Queue `signal` for the live link.
    ///
    /// Returns `false` if the signal was dropped because the link is down
    /// or the queue is full.
    pub fn emit(&self, signal: ClientSignal) -> bool {
        let state = *self.state.borrow();
        if !state.is_connected() {
            tracing::debug!(%state, partner = %signal.partner_id(), "dropping signal while not connected");
            return false;
        }
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!(partner = %signal.partner_id(), "signal queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Tell `partner` the current user started typing.
    pub fn typing_start(&self, partner: &UserId) -> bool {
        self.emit(ClientSignal::TypingStart {
            partner_id: partner.clone(),
        })
    }

    /// Tell `partner` the current user stopped typing.
    pub fn typing_stop(&self, partner: &UserId) -> bool {
        self.emit(ClientSignal::TypingStop {
            partner_id: partner.clone(),
        })
    }

    /// Ask for messages with `partner` newer than `last_sequence`.
    pub fn request_sync(&self, partner: &UserId, last_sequence: SequenceNumber) -> bool {
        self.emit(ClientSignal::RequestSync {
            partner_id: partner.clone(),
            last_sequence,
        })
    }

    /// Whether the live link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Receives only server events of one kind.
pub struct EventSubscription {
    kind: EventKind,
    rx: broadcast::Receiver<ChannelEvent>,
}

impl EventSubscription {
    /// Next event of the subscribed kind; `None` once the manager shut down.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ChannelEvent::Server(event)) if event.kind() == self.kind => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(kind = %self.kind, skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Receives every [`ChannelEvent`].
pub struct ChannelSubscription {
    rx: broadcast::Receiver<ChannelEvent>,
}

impl ChannelSubscription {
    /// Next event; `None` once the manager shut down and the backlog drained.
    ///
    /// Events dropped because this subscriber fell behind are reported as
    /// [`ChannelEvent::Lagged`] before the retained backlog.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "channel subscriber lagged");
                Some(ChannelEvent::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Owns the live channel for one signed-in user.
pub struct ConnectionManager<D: Dialer> {
    dialer: Arc<D>,
    config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: Mutex<Option<broadcast::Sender<ChannelEvent>>>,
    signals: SignalSender,
    outbound_rx: Mutex<Option<mpsc::Receiver<ClientSignal>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Dialer> ConnectionManager<D> {
    /// Create a manager. Nothing is dialed until [`connect`](Self::connect).
    ///
    /// `event_buffer` is the broadcast capacity; slow subscribers beyond it
    /// skip events with a warning.
    #[must_use]
    pub fn new(dialer: D, config: ReconnectConfig, event_buffer: usize) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(event_buffer.max(1));
        let (tx, outbound_rx) = mpsc::channel(SIGNAL_QUEUE);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dialer: Arc::new(dialer),
            config,
            state_tx: Arc::new(state_tx),
            events_tx: Mutex::new(Some(events_tx)),
            signals: SignalSender {
                tx,
                state: state_rx,
            },
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Start the supervisor task. Calling it again is a no-op.
    ///
    /// Subscribe before connecting to observe the first `Connected` event.
    pub fn connect(&self) {
        let Some(outbound) = self.outbound_rx.lock().take() else {
            tracing::debug!("connect called twice, ignoring");
            return;
        };
        let Some(events_tx) = self.events_tx.lock().clone() else {
            tracing::debug!("connect after shutdown, ignoring");
            return;
        };

        let handle = tokio::spawn(supervise(
            Arc::clone(&self.dialer),
            self.config.clone(),
            Arc::clone(&self.state_tx),
            events_tx,
            outbound,
            self.shutdown_tx.subscribe(),
        ));
        *self.task.lock() = Some(handle);
    }

    /// Whether the live link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Reactive view of the connection state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to one kind of server event.
    #[must_use]
    pub fn on(&self, kind: EventKind) -> EventSubscription {
        EventSubscription {
            kind,
            rx: self.raw_receiver(),
        }
    }

    /// Subscribe to every server event and state transition.
    #[must_use]
    pub fn subscribe(&self) -> ChannelSubscription {
        ChannelSubscription {
            rx: self.raw_receiver(),
        }
    }

    /// Handle for writing control signals.
    #[must_use]
    pub fn signals(&self) -> SignalSender {
        self.signals.clone()
    }

    /// See [`SignalSender::typing_start`].
    pub fn emit_typing_start(&self, partner: &UserId) -> bool {
        self.signals.typing_start(partner)
    }

    /// See [`SignalSender::typing_stop`].
    pub fn emit_typing_stop(&self, partner: &UserId) -> bool {
        self.signals.typing_stop(partner)
    }

    /// See [`SignalSender::request_sync`].
    pub fn request_sync(&self, partner: &UserId, last_sequence: SequenceNumber) -> bool {
        self.signals.request_sync(partner, last_sequence)
    }

    /// Stop the supervisor and close every subscription.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(err = %e, "connection supervisor ended abnormally");
        }
        if let Some(events_tx) = self.events_tx.lock().take() {
            publish(&self.state_tx, &events_tx, ConnectionState::Disconnected);
        }
        tracing::info!("connection manager shut down");
    }

    fn raw_receiver(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.lock().as_ref().map_or_else(
            || broadcast::channel(1).1,
            broadcast::Sender::subscribe,
        )
    }
}

/// How a pumped link ended.
#[derive(Debug, PartialEq, Eq)]
enum LinkEnd {
    Lost,
    Shutdown,
}

/// Set the state and broadcast it, if it changed.
fn publish(
    state_tx: &watch::Sender<ConnectionState>,
    events_tx: &broadcast::Sender<ChannelEvent>,
    state: ConnectionState,
) {
    let changed = state_tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    });
    if changed {
        tracing::debug!(%state, "connection state changed");
        // No subscribers is fine.
        let _ = events_tx.send(ChannelEvent::State(state));
    }
}

/// Resolves once shutdown is requested or the manager is dropped.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn supervise<D: Dialer>(
    dialer: Arc<D>,
    config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: broadcast::Sender<ChannelEvent>,
    mut outbound: mpsc::Receiver<ClientSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    publish(&state_tx, &events_tx, ConnectionState::Connecting);
    let mut attempt: u32 = 0;

    loop {
        let dialed = tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown) => break,
            result = dialer.dial() => result,
        };

        match dialed {
            Ok((sink, stream)) => {
                while outbound.try_recv().is_ok() {}
                publish(&state_tx, &events_tx, ConnectionState::Connected);
                tracing::info!(attempt, "live channel up");

                let started = Instant::now();
                let end = pump(sink, stream, &events_tx, &mut outbound, &mut shutdown).await;
                if end == LinkEnd::Shutdown {
                    break;
                }
                if started.elapsed() >= config.stability_threshold {
                    attempt = 0;
                }
                tracing::info!(uptime_ms = started.elapsed().as_millis(), "live channel lost");
            }
            Err(e) => {
                tracing::warn!(attempt, err = %e, "live channel dial failed");
            }
        }

        attempt = attempt.saturating_add(1);
        if config.exhausted(attempt) {
            tracing::warn!(max_attempts = config.max_attempts, "giving up on live channel");
            break;
        }
        publish(&state_tx, &events_tx, ConnectionState::Reconnecting { attempt });

        let delay = config.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "backing off");
        tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown) => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    publish(&state_tx, &events_tx, ConnectionState::Disconnected);
}

async fn pump<S: FrameSink, R: FrameStream>(
    mut sink: S,
    mut stream: R,
    events_tx: &broadcast::Sender<ChannelEvent>,
    outbound: &mut mpsc::Receiver<ClientSignal>,
    shutdown: &mut watch::Receiver<bool>,
) -> LinkEnd {
    loop {
        tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => return LinkEnd::Shutdown,
            frame = stream.recv() => match frame {
                Some(Ok(text)) => match codec::decode_event(&text) {
                    Ok(event) => {
                        tracing::trace!(kind = %event.kind(), "live event");
                        let _ = events_tx.send(ChannelEvent::Server(event));
                    }
                    Err(e) => tracing::warn!(err = %e, "skipping invalid live frame"),
                },
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "live channel read failed");
                    return LinkEnd::Lost;
                }
                None => return LinkEnd::Lost,
            },
            signal = outbound.recv() => {
                let Some(signal) = signal else {
                    return LinkEnd::Shutdown;
                };
                match codec::encode_signal(&signal) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!(err = %e, "live channel write failed");
                            return LinkEnd::Lost;
                        }
                    }
                    Err(e) => tracing::warn!(err = %e, "could not encode signal"),
                }
            }
        }
    }
}
