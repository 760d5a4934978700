//! Transport abstraction for the CM connection.
//!
//! The protocol engine only needs a duplex text-frame channel with ping/pong
//! control frames. The built-in WebSocket implementation lives in
//! [`crate::socket`]; custom backends (in-process test servers, tunnelled
//! connections) plug in through [`TransportFactory`].

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::socket::error::TransportError;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A complete text frame has been received from the server.
    TextReceived(String),
    /// A ping control frame has been received.
    PingReceived(Bytes),
    /// A pong control frame has been received.
    PongReceived,
    /// The connection was lost.
    Disconnected,
}

/// Represents an active connection to the CM server.
///
/// Implementations must serialize all writes internally; text and control
/// frames from concurrent tasks may not interleave on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the server.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Sends a ping control frame.
    async fn send_ping(&self) -> Result<(), TransportError>;

    /// Sends a pong control frame echoing `payload`.
    async fn send_pong(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
///
/// Called once per connection attempt, including every reconnect.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects to `url` and returns the transport along with its stream of
    /// events.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError>;
}
