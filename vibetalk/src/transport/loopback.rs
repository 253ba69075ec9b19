//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a WebSocket.
//! Created via [`LoopbackTransport::create_pair`], which returns the client
//! end and a [`LoopbackBackend`] that plays the server: it pushes inbound
//! events and observes what the client sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use vibetalk_proto::codec;
use vibetalk_proto::event::{InboundEvent, OutboundEvent};

use super::{Transport, TransportError, TransportType};

/// Client end of an in-process connection.
pub struct LoopbackTransport {
    /// Events sent by the client (delivered to the backend end).
    tx: mpsc::UnboundedSender<OutboundEvent>,
    /// Events pushed by the backend end.
    rx: Mutex<mpsc::Receiver<InboundEvent>>,
    /// Cleared by [`Transport::disconnect`] or [`LoopbackBackend::close`].
    connected: Arc<AtomicBool>,
    /// Set by [`Transport::disconnect`]; `recv` stops at once.
    hung_up: AtomicBool,
    /// Wakes a pending `recv` on local disconnect.
    shutdown: Notify,
}

/// Server end of an in-process connection.
pub struct LoopbackBackend {
    /// Feeds the client's `recv`. `None` once closed.
    tx: Option<mpsc::Sender<InboundEvent>>,
    /// Everything the client has sent.
    rx: mpsc::UnboundedReceiver<OutboundEvent>,
    /// Shared with the client end.
    connected: Arc<AtomicBool>,
}

impl LoopbackTransport {
    /// Create a connected client/backend pair.
    ///
    /// The `buffer` parameter bounds the inbound direction; outbound sends
    /// never block, as with the WebSocket writer queue.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use vibetalk::transport::Transport;
    /// use vibetalk::transport::loopback::LoopbackTransport;
    /// use vibetalk_proto::event::InboundEvent;
    /// use vibetalk_proto::message::PeerId;
    ///
    /// # async fn example() {
    /// let (client, backend) = LoopbackTransport::create_pair(32);
    /// backend
    ///     .push(InboundEvent::UnreadCleared { peer_id: PeerId::new("x") })
    ///     .await
    ///     .unwrap();
    /// let event = client.recv().await.unwrap();
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackBackend) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let connected = Arc::new(AtomicBool::new(true));

        let client = Self {
            tx: out_tx,
            rx: Mutex::new(in_rx),
            connected: Arc::clone(&connected),
            hung_up: AtomicBool::new(false),
            shutdown: Notify::new(),
        };
        let backend = LoopbackBackend {
            tx: Some(in_tx),
            rx: out_rx,
            connected,
        };
        (client, backend)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::NotConnected);
        }
        // Serialize anyway so encoding failures surface the same way as on
        // the WebSocket transport.
        codec::encode(event)?;
        self.tx
            .send(event.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<InboundEvent, TransportError> {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.hung_up.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        // After a backend close the channel drains, then yields `None`.
        let mut rx = self.rx.lock().await;
        tokio::select! {
            event = rx.recv() => event.ok_or(TransportError::ConnectionClosed),
            () = notified => Err(TransportError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    fn disconnect(&self) {
        self.hung_up.store(true, Ordering::Relaxed);
        if self.connected.swap(false, Ordering::Relaxed) {
            tracing::debug!("loopback transport disconnected");
        }
        self.shutdown.notify_waiters();
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

impl LoopbackBackend {
    /// Deliver an event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the backend was
    /// closed or the client end dropped.
    pub async fn push(&self, event: InboundEvent) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(event)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Deliver a raw text frame, decoding it the way the WebSocket reader
    /// does. Malformed frames are logged and skipped.
    ///
    /// Returns `true` if the frame decoded and was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client is gone.
    pub async fn push_frame(&self, frame: &str) -> Result<bool, TransportError> {
        match codec::decode(frame) {
            Ok(event) => self.push(event).await.map(|()| true),
            Err(e) => {
                tracing::warn!(err = %e, "malformed loopback frame, skipping");
                Ok(false)
            }
        }
    }

    /// Wait for the next event the client sent.
    ///
    /// Returns `None` once the client end is dropped and drained.
    pub async fn next_sent(&mut self) -> Option<OutboundEvent> {
        self.rx.recv().await
    }

    /// Take the next already-sent event without waiting.
    pub fn try_next_sent(&mut self) -> Option<OutboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain every event sent so far.
    pub fn drain_sent(&mut self) -> Vec<OutboundEvent> {
        std::iter::from_fn(|| self.try_next_sent()).collect()
    }

    /// Simulate the server dropping the connection.
    ///
    /// Events already pushed stay readable; after them the client sees
    /// [`TransportError::ConnectionClosed`].
    pub fn close(&mut self) {
        self.tx = None;
        self.connected.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibetalk_proto::event::PeerRequest;
    use vibetalk_proto::message::PeerId;

    fn mark_read(peer: &str) -> OutboundEvent {
        OutboundEvent::MarkPrivateRead(PeerRequest {
            requester_id: PeerId::new("me"),
            peer_id: PeerId::new(peer),
        })
    }

    fn cleared(peer: &str) -> InboundEvent {
        InboundEvent::UnreadCleared {
            peer_id: PeerId::new(peer),
        }
    }

    #[tokio::test]
    async fn send_reaches_backend() {
        let (client, mut backend) = LoopbackTransport::create_pair(8);
        client.send(&mark_read("x")).unwrap();
        assert_eq!(backend.next_sent().await, Some(mark_read("x")));
    }

    #[tokio::test]
    async fn pushed_events_arrive_in_order() {
        let (client, backend) = LoopbackTransport::create_pair(8);
        for peer in ["a", "b", "c"] {
            backend.push(cleared(peer)).await.unwrap();
        }
        for peer in ["a", "b", "c"] {
            assert_eq!(client.recv().await.unwrap(), cleared(peer));
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (client, backend) = LoopbackTransport::create_pair(8);
        assert!(!backend.push_frame("{oops").await.unwrap());
        assert!(
            backend
                .push_frame(r#"["unread_cleared",{"peerId":"x"}]"#)
                .await
                .unwrap()
        );
        assert_eq!(client.recv().await.unwrap(), cleared("x"));
    }

    #[tokio::test]
    async fn send_after_disconnect_is_rejected() {
        let (client, mut backend) = LoopbackTransport::create_pair(8);
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(&mark_read("x")),
            Err(TransportError::NotConnected)
        ));
        assert!(backend.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn recv_after_backend_close_drains_then_reports_closed() {
        let (client, mut backend) = LoopbackTransport::create_pair(8);
        backend.push(cleared("x")).await.unwrap();
        backend.close();
        assert!(!client.is_connected());
        assert_eq!(client.recv().await.unwrap(), cleared("x"));
        assert!(matches!(
            client.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn backend_close_keeps_every_pushed_event_readable() {
        let (client, mut backend) = LoopbackTransport::create_pair(8);
        for peer in ["a", "b", "c"] {
            backend.push(cleared(peer)).await.unwrap();
        }
        backend.close();
        assert!(matches!(
            backend.push(cleared("d")).await,
            Err(TransportError::ConnectionClosed)
        ));
        for peer in ["a", "b", "c"] {
            assert_eq!(client.recv().await.unwrap(), cleared(peer));
        }
        assert!(matches!(
            client.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn local_disconnect_stops_recv_before_pending_events() {
        let (client, backend) = LoopbackTransport::create_pair(8);
        backend.push(cleared("x")).await.unwrap();
        client.disconnect();
        assert!(matches!(
            client.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn disconnect_wakes_pending_recv() {
        let (client, _backend) = LoopbackTransport::create_pair(8);
        let client = Arc::new(client);
        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.recv().await })
        };
        tokio::task::yield_now().await;
        client.disconnect();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("recv should wake")
            .unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn send_after_backend_drop_returns_connection_closed() {
        let (client, backend) = LoopbackTransport::create_pair(8);
        drop(backend);
        assert!(matches!(
            client.send(&mark_read("x")),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn transport_type_is_loopback() {
        let (client, _backend) = LoopbackTransport::create_pair(1);
        assert_eq!(client.transport_type(), TransportType::Loopback);
    }
}
