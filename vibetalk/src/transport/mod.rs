//! Transport layer abstraction for `VibeTalk`.
//!
//! Defines the [`Transport`] trait the session talks through.
//! Concrete implementations:
//! - [`ws::WsTransport`]: persistent WebSocket connection to the backend
//! - [`loopback::LoopbackTransport`]: in-process channels for testing

pub mod loopback;
pub mod ws;

use std::fmt;

use vibetalk_proto::codec::EncodeError;
use vibetalk_proto::event::{InboundEvent, OutboundEvent};

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket connection to a live backend.
    WebSocket,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur during transport operations.
///
/// All of these are connectivity problems: the session reports them as
/// notices and keeps running.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the backend has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport was never connected or has been disconnected locally.
    #[error("not connected")]
    NotConnected,

    /// Connecting did not complete within the configured timeout.
    #[error("transport operation timed out")]
    Timeout,

    /// The backend endpoint could not be reached.
    #[error("backend {0} is unreachable")]
    Unreachable(String),

    /// The outbound event could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection to the chat backend.
///
/// Implementations own the socket; the session only sees typed events.
/// Inbound frames that fail to decode are logged and skipped inside the
/// transport, so [`Transport::recv`] only ever yields valid events.
pub trait Transport: Send + Sync {
    /// Queue an event for delivery without waiting for the network.
    ///
    /// Returns `Ok(())` once the frame is handed to the writer. This does
    /// NOT guarantee delivery.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] or [`TransportError::ConnectionClosed`]
    /// when there is no live connection; the event is dropped.
    fn send(&self, event: &OutboundEvent) -> Result<(), TransportError>;

    /// Receive the next inbound event, in wire order.
    ///
    /// Waits until an event arrives. Returns
    /// [`TransportError::ConnectionClosed`] once the connection is gone and
    /// every buffered event has been consumed.
    fn recv(&self)
    -> impl std::future::Future<Output = Result<InboundEvent, TransportError>> + Send;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Release the connection. Calling this more than once is harmless.
    fn disconnect(&self);

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;
}
