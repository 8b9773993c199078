//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a WebSocket.
//! [`LoopbackDialer::new`] returns the dialer plus a [`LoopbackServer`] that
//! plays the backend: every successful dial hands the server one
//! [`ServerConnection`], through which tests push frames and read the
//! signals the client wrote.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use skillchat_proto::codec;
use skillchat_proto::event::{ClientSignal, ServerEvent};
use tokio::sync::mpsc;

use super::{Dialer, FrameSink, FrameStream, TransportError};

/// Dialer whose links terminate in a [`LoopbackServer`].
#[derive(Clone)]
pub struct LoopbackDialer {
    accept_tx: mpsc::Sender<ServerConnection>,
    refuse: Arc<AtomicBool>,
    dials: Arc<AtomicU32>,
    buffer: usize,
}

/// Backend side of a [`LoopbackDialer`].
pub struct LoopbackServer {
    accept_rx: mpsc::Receiver<ServerConnection>,
    refuse: Arc<AtomicBool>,
    dials: Arc<AtomicU32>,
}

/// Server end of one loopback link. Dropping it closes the link.
pub struct ServerConnection {
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
}

/// Client write half of a loopback link.
pub struct LoopbackSink(mpsc::Sender<String>);

/// Client read half of a loopback link.
pub struct LoopbackStream(mpsc::Receiver<String>);

impl LoopbackDialer {
    /// Create a connected dialer/server pair. `buffer` is the channel
    /// capacity for each direction of every link.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, LoopbackServer) {
        let (accept_tx, accept_rx) = mpsc::channel(8);
        let refuse = Arc::new(AtomicBool::new(false));
        let dials = Arc::new(AtomicU32::new(0));
        let dialer = Self {
            accept_tx,
            refuse: Arc::clone(&refuse),
            dials: Arc::clone(&dials),
            buffer,
        };
        let server = LoopbackServer {
            accept_rx,
            refuse,
            dials,
        };
        (dialer, server)
    }
}

impl Dialer for LoopbackDialer {
    type Sink = LoopbackSink;
    type Stream = LoopbackStream;

    async fn dial(&self) -> Result<(LoopbackSink, LoopbackStream), TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused("loopback server refusing".into()));
        }

        let (to_client, client_rx) = mpsc::channel(self.buffer);
        let (client_tx, from_client) = mpsc::channel(self.buffer);
        self.accept_tx
            .send(ServerConnection {
                to_client,
                from_client,
            })
            .await
            .map_err(|_| TransportError::Refused("loopback server dropped".into()))?;

        Ok((LoopbackSink(client_tx), LoopbackStream(client_rx)))
    }
}

impl FrameSink for LoopbackSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.0
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl FrameStream for LoopbackStream {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

impl LoopbackServer {
    /// Wait for the next client link.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }

    /// Make subsequent dials fail with [`TransportError::Refused`].
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of dial attempts so far, refused ones included.
    #[must_use]
    pub fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

impl ServerConnection {
    /// Push an event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client side is gone.
    pub async fn push(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let frame =
            codec::encode_event(event).map_err(|e| TransportError::WebSocket(e.to_string()))?;
        self.push_raw(frame).await
    }

    /// Push an arbitrary text frame, valid or not.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client side is gone.
    pub async fn push_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(frame.into())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Next signal written by the client; `None` once the client hangs up.
    /// Frames that do not decode as a [`ClientSignal`] are skipped.
    pub async fn next_signal(&mut self) -> Option<ClientSignal> {
        while let Some(frame) = self.from_client.recv().await {
            match serde_json::from_str(&frame) {
                Ok(signal) => return Some(signal),
                Err(e) => tracing::warn!(err = %e, "loopback server got undecodable signal"),
            }
        }
        None
    }

    /// Non-blocking variant of [`next_signal`](Self::next_signal).
    pub fn try_next_signal(&mut self) -> Option<ClientSignal> {
        let frame = self.from_client.try_recv().ok()?;
        serde_json::from_str(&frame).ok()
    }
}
