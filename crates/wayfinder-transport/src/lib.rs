//! Transport layer for Wayfinder.
//!
//! Provides the [`Connection`] abstraction over live bidirectional text
//! channels, the WebSocket implementations on both sides of the mediator
//! (accepting device sockets, dialing room backends), and the delivery
//! utilities every mediator uses: a bounded [`MessageQueue`] and the
//! [`Drain`] task that pumps it onto a connection.

#![allow(async_fn_in_trait)]

mod error;
mod queue;
mod websocket;

pub use error::TransportError;
pub use queue::{Drain, MessageQueue};
pub use websocket::{
    ws_connect, ClientWsConnection, ServerWsConnection, WebSocketConnection,
    WebSocketTransport,
};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live bidirectional text-message channel.
///
/// The methods return named `Send` futures (rather than plain `async fn`)
/// because drains and listeners run inside spawned tasks that are generic
/// over the connection type.
pub trait Connection: Send + Sync + 'static {
    /// Sends one text frame to the remote peer.
    fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next text frame from the remote peer.
    ///
    /// Returns `Ok(None)` exactly once when the connection closes,
    /// regardless of which side initiated the closure.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
