//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to the local RPC endpoint and send/receive text frames.
//! No knowledge of the RPC vocabulary, the handshake, or reconnection.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::ORIGIN, HeaderValue, Request},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::RpcError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// It can only be constructed via `Transport::connect()`, so holding one
/// means the upgrade completed.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint, giving up after `timeout`.
    pub async fn connect(url: &str, origin: &str, timeout: Duration) -> Result<Self, RpcError> {
        debug!(url = %url, origin = %origin, "Connecting to WebSocket");

        let request = upgrade_request(url, origin)?;

        let (ws, _) = tokio::time::timeout(timeout, connect_async_with_config(request, None, false))
            .await
            .map_err(|_| RpcError::Timeout(format!("Connecting to {}", url)))?
            .map_err(|e| RpcError::Connection(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Send a text frame.
    pub async fn send(&mut self, text: String) -> Result<(), RpcError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to send: {}", e)))
    }

    /// Receive the next text payload.
    ///
    /// Returns None if the peer closed the connection.
    /// Binary frames are accepted when they carry UTF-8.
    pub async fn recv(&mut self) -> Result<Option<String>, RpcError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data).map(Some).map_err(|e| {
                        RpcError::MalformedFrame(format!("Binary frame is not UTF-8: {}", e))
                    })
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Peer closed connection");
                    return Ok(None);
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(RpcError::Connection(format!("WebSocket error: {}", e))),
                None => return Ok(None),
            }
        }
    }

    /// Best-effort release. Closing an already-broken socket is expected to
    /// fail and the failure is discarded.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Ignoring close failure");
        }
    }
}

/// Upgrade request for `url` carrying the `Origin` the peer whitelists.
fn upgrade_request(url: &str, origin: &str) -> Result<Request<()>, RpcError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RpcError::Connection(format!("Invalid endpoint {}: {}", url, e)))?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| RpcError::Connection(format!("Invalid origin {}: {}", origin, e)))?;
    request.headers_mut().insert(ORIGIN, origin);
    Ok(request)
}
