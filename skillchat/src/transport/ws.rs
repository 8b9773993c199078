//! WebSocket dialer for the backend's live channel.
//!
//! The session credential travels as an `Authorization: Bearer` header on
//! the upgrade request. Frames are JSON text; binary frames are accepted if
//! they hold UTF-8, ping/pong is handled by tungstenite.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Dialer, FrameSink, FrameStream, TransportError};

/// Type alias for the underlying WebSocket stream.
type WsConnection = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials `ws://` / `wss://` live-channel endpoints.
#[derive(Debug, Clone)]
pub struct WsDialer {
    url: Url,
    token: String,
    connect_timeout: Duration,
}

impl WsDialer {
    /// Create a dialer for `url`, authenticating with `token`.
    #[must_use]
    pub const fn new(url: Url, token: String) -> Self {
        Self {
            url,
            token,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

/// Write half of a WebSocket link.
pub struct WsSink(futures_util::stream::SplitSink<WsConnection, Message>);

/// Read half of a WebSocket link.
pub struct WsStream(futures_util::stream::SplitStream<WsConnection>);

impl Dialer for WsDialer {
    type Sink = WsSink;
    type Stream = WsStream;

    async fn dial(&self) -> Result<(WsSink, WsStream), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Refused(format!("invalid live URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| TransportError::Auth(format!("credential is not a valid header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "live channel connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %self.url, err = %e, "live channel connect failed");
                map_ws_connect_error(e)
            })?;

        tracing::info!(url = %self.url, "live channel connected");
        let (sink, stream) = stream.split();
        Ok((WsSink(sink), WsStream(stream)))
    }
}

impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

impl FrameStream for WsStream {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(msg) = self.0.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!("non UTF-8 binary frame, skipping"),
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("live channel closed by server");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
        None
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tungstenite::Error) -> TransportError {
    use tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Refused(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            TransportError::Auth(format!("status {}", response.status()))
        }
        WsError::Http(response) => {
            TransportError::Refused(format!("HTTP status {}", response.status()))
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}
