//! WebSocket connections via `tokio-tungstenite`.
//!
//! The mediator sits on both sides of WebSocket: it accepts device
//! connections ([`WebSocketTransport`]) and dials out to room backends
//! ([`ws_connect`]). Both produce the same [`WebSocketConnection`], so
//! everything above this module is symmetric.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A device-side connection (accepted by the transport).
pub type ServerWsConnection = WebSocketConnection<TcpStream>;

/// A room-side connection (dialed by [`ws_connect`]).
pub type ClientWsConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

/// Accepts device-side WebSocket connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to the given address and starts listening.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for and accepts the next device connection.
    pub async fn accept(&mut self) -> Result<ServerWsConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let conn = WebSocketConnection::wrap(ws);
        tracing::debug!(id = %conn.id(), %addr, "accepted WebSocket connection");
        Ok(conn)
    }
}

/// Dials a room backend. One attempt; callers own any retry policy.
pub async fn ws_connect(url: &str) -> Result<ClientWsConnection, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectFailed {
            url: url.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ),
        })?;
    let conn = WebSocketConnection::wrap(ws);
    tracing::debug!(id = %conn.id(), url, "connected to remote endpoint");
    Ok(conn)
}

/// A single WebSocket connection carrying text frames.
///
/// The stream is split so that a drain task can send while a listener
/// task is parked in `recv` — the two halves lock independently.
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn wrap(ws: WebSocketStream<S>) -> Self {
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (writer, reader) = ws.split();
        Self {
            id,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let msg = Message::Text(text.to_string().into());
        self.writer.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        loop {
            let msg = self.reader.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
