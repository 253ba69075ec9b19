//! WebSocket transport for `VibeTalk`.
//!
//! Implements the [`Transport`] trait over one persistent WebSocket
//! connection to the chat backend. Each text frame carries one event packet
//! (see [`vibetalk_proto::codec`]).
//!
//! The socket is split after connecting: a writer task drains a queue of
//! outbound frames so [`Transport::send`] never waits on the network, and a
//! reader task decodes inbound frames into a bounded channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use vibetalk_proto::codec;
use vibetalk_proto::event::{InboundEvent, OutboundEvent};

use super::{Transport, TransportError, TransportType};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the backend.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the decoded inbound event queue.
pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// WebSocket transport implementing the [`Transport`] trait.
///
/// Created via [`WsTransport::connect`], which establishes the connection
/// and spawns the background reader and writer tasks.
pub struct WsTransport {
    /// The backend URL (ws:// or wss://).
    endpoint: String,
    /// Queue feeding the writer task. Taken on disconnect, which makes the
    /// writer send a close frame and exit.
    outgoing: SyncMutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Events decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<InboundEvent>>,
    /// Whether the connection is up.
    connected: Arc<AtomicBool>,
    /// Background reader; aborted on disconnect so `recv` wakes up.
    reader_handle: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to the backend at `endpoint`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish within `timeout`.
    /// - [`TransportError::Unreachable`] if nothing is listening at the endpoint.
    /// - [`TransportError::Io`] for TLS, HTTP upgrade, or other socket failures.
    pub async fn connect(
        endpoint: &str,
        timeout: Duration,
        inbound_buffer: usize,
    ) -> Result<Self, TransportError> {
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(endpoint))
            .await
            .map_err(|_| {
                tracing::warn!(url = endpoint, "WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = endpoint, err = %e, "WebSocket connect failed");
                map_ws_connect_error(endpoint, e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let connected = Arc::new(AtomicBool::new(true));

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(ws_sender, out_rx, Arc::clone(&connected)));

        let (in_tx, in_rx) = mpsc::channel(inbound_buffer.max(1));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, in_tx, Arc::clone(&connected)));

        tracing::info!(url = endpoint, "connected to chat backend");

        Ok(Self {
            endpoint: endpoint.to_string(),
            outgoing: SyncMutex::new(Some(out_tx)),
            incoming: Mutex::new(in_rx),
            connected,
            reader_handle,
        })
    }

    /// Return the backend URL this transport is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for WsTransport {
    /// Encode the event and queue it for the writer task.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] after [`Transport::disconnect`].
    /// - [`TransportError::ConnectionClosed`] if the connection dropped.
    /// - [`TransportError::Encode`] if the event cannot be serialized.
    fn send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let guard = self.outgoing.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let frame = codec::encode(event)?;
        tracing::debug!(event = %event.name(), bytes = frame.len(), "queueing frame");
        tx.send(Message::Text(frame.into())).map_err(|_| {
            self.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    /// Receive the next decoded event from the reader task.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the reader task has
    /// exited and every buffered event has been consumed.
    async fn recv(&self) -> Result<InboundEvent, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn disconnect(&self) {
        let sender = self.outgoing.lock().take();
        self.connected.store(false, Ordering::Relaxed);
        self.reader_handle.abort();
        if sender.is_some() {
            tracing::info!(url = %self.endpoint, "disconnecting from chat backend");
        }
    }

    /// Return [`TransportType::WebSocket`].
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task that writes queued frames to the socket.
///
/// Exits on the first write error, or sends a close frame once the queue
/// sender is dropped by [`Transport::disconnect`].
async fn writer_loop(
    mut ws_sender: WsSender,
    mut rx: mpsc::UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = ws_sender.send(msg).await {
            tracing::warn!(err = %e, "WebSocket write failed");
            connected.store(false, Ordering::Relaxed);
            return;
        }
    }
    let _ = ws_sender.send(Message::Close(None)).await;
    let _ = ws_sender.close().await;
    tracing::debug!("WebSocket writer task exiting");
}

/// Background task that reads WebSocket frames and decodes them.
///
/// Malformed frames are logged and skipped; the task does not disconnect on
/// bad data. Sets `connected` to `false` when the socket closes or errors.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<InboundEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(bytes = data.len(), "non-UTF-8 binary frame, skipping");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        };

        match codec::decode(&text) {
            Ok(event) => {
                tracing::debug!(event = %event.name(), "received event");
                if tx.send(event).await.is_err() {
                    // Receiver dropped: the transport is gone.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed frame, skipping");
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("WebSocket reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(
    endpoint: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(endpoint.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "backend HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "backend connection error: {other}"
        ))),
    }
}
