//! Live-channel transport for `SkillChat`.
//!
//! Defines the [`Dialer`] trait that produces one bidirectional text-frame
//! link to the backend, plus the [`connection::ConnectionManager`] that
//! supervises it. Concrete dialers:
//! - [`ws::WsDialer`] — WebSocket with bearer authentication
//! - [`loopback::LoopbackDialer`] — in-process channels for testing

pub mod connection;
pub mod loopback;
pub mod ws;

use std::fmt;

use skillchat_proto::event::ServerEvent;

/// Errors that can occur while dialing or using a live link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link has been closed by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// The dial did not complete in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The backend refused the connection (unreachable, wrong URL).
    #[error("connection refused: {0}")]
    Refused(String),

    /// The backend rejected the session credential.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write half of a live link.
pub trait FrameSink: Send {
    /// Send one text frame.
    fn send(
        &mut self,
        frame: String,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

/// Read half of a live link.
pub trait FrameStream: Send {
    /// Receive the next text frame. `None` means the link closed cleanly.
    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Option<Result<String, TransportError>>> + Send;
}

/// Opens authenticated links to the backend's live channel.
///
/// The [`connection::ConnectionManager`] calls [`dial`](Self::dial) once per
/// connection attempt, so implementations must be reusable.
pub trait Dialer: Send + Sync + 'static {
    /// Write half produced by this dialer.
    type Sink: FrameSink + 'static;
    /// Read half produced by this dialer.
    type Stream: FrameStream + 'static;

    /// Establish a new link.
    fn dial(
        &self,
    ) -> impl std::future::Future<Output = Result<(Self::Sink, Self::Stream), TransportError>> + Send;
}

/// Lifecycle of the live channel as observed by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First dial in progress.
    Connecting,
    /// A link is up.
    Connected,
    /// The link dropped; waiting to redial.
    Reconnecting {
        /// 1-based attempt counter since the last stable connection.
        attempt: u32,
    },
    /// Shut down, or reconnect attempts exhausted.
    Disconnected,
}

impl ConnectionState {
    /// Whether a link is up.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Everything the connection manager publishes to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A validated frame from the backend.
    Server(ServerEvent),
    /// The connection state changed.
    State(ConnectionState),
    /// The subscriber fell behind and this many events were dropped.
    /// Anything they carried must be re-fetched.
    Lagged(u64),
}
