//! WebSocket transport against an in-process backend.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use vibetalk::identity::{Avatar, Identity, Profile};
use vibetalk::net::{self, NetCommand, NetConfig};
use vibetalk::state::SessionEvent;
use vibetalk::transport::ws::WsTransport;
use vibetalk::transport::{Transport, TransportError, TransportType};
use vibetalk_proto::event::{GlobalMessageOut, InboundEvent, OutboundEvent};
use vibetalk_proto::message::{MessageKind, PeerId};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Handles to a single-connection test backend.
struct Backend {
    url: String,
    /// Frames the client sent, parsed as JSON.
    received: mpsc::Receiver<Value>,
    /// Text frames to push; dropping it closes the connection.
    push: mpsc::Sender<String>,
}

async fn start_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, received) = mpsc::channel(64);
    let (push, mut push_rx) = mpsc::channel::<String>(64);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let value = serde_json::from_str(text.as_str()).unwrap();
                        let _ = received_tx.send(value).await;
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                push = push_rx.recv() => match push {
                    Some(text) => sink.send(Message::text(text)).await.unwrap(),
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
            }
        }
    });

    Backend {
        url: format!("ws://{addr}/socket"),
        received,
        push,
    }
}

async fn next_frame(backend: &mut Backend) -> Value {
    tokio::time::timeout(TIMEOUT, backend.received.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn outbound_events_are_json_event_packets() {
    let mut backend = start_backend().await;
    let transport = WsTransport::connect(&backend.url, TIMEOUT, 16).await.unwrap();
    assert!(transport.is_connected());
    assert_eq!(transport.transport_type(), TransportType::WebSocket);

    transport
        .send(&OutboundEvent::SendGlobalMessage(GlobalMessageOut {
            session_id: PeerId::new("me"),
            display_name: "Ana".into(),
            avatar_ref: "avatar1.png".into(),
            text: "hello".into(),
            kind: MessageKind::Text,
            audio_data: None,
        }))
        .unwrap();

    let frame = next_frame(&mut backend).await;
    assert_eq!(frame[0], "send_global_message");
    assert_eq!(frame[1]["sessionId"], "me");
    assert_eq!(frame[1]["text"], "hello");
    assert_eq!(frame[1]["kind"], "text");
    assert!(frame[1].get("audioData").is_none());
}

#[tokio::test]
async fn inbound_frames_decode_in_order_and_junk_is_skipped() {
    let backend = start_backend().await;
    let transport = WsTransport::connect(&backend.url, TIMEOUT, 16).await.unwrap();

    for frame in [
        json!(["online_users_update", [{"userId": "a", "username": "A"}]]).to_string(),
        "definitely not json".to_string(),
        json!(["no_such_event", {}]).to_string(),
        json!(["global_message", {"userId": "a", "username": "A", "message": "hi", "timestamp": 1_700_000_000}])
            .to_string(),
    ] {
        backend.push.send(frame).await.unwrap();
    }

    let first = tokio::time::timeout(TIMEOUT, transport.recv()).await.unwrap().unwrap();
    let InboundEvent::PresenceSnapshot(peers) = first else {
        panic!("expected presence snapshot, got {first:?}");
    };
    assert_eq!(peers[0].display_name, "A");

    let second = tokio::time::timeout(TIMEOUT, transport.recv()).await.unwrap().unwrap();
    let InboundEvent::GlobalMessage(message) = second else {
        panic!("expected global message, got {second:?}");
    };
    assert_eq!(message.body.payload(), "hi");
    assert_eq!(message.timestamp.as_millis(), 1_700_000_000_000);
}

#[tokio::test]
async fn server_close_ends_recv() {
    let Backend { url, push, .. } = start_backend().await;
    let transport = WsTransport::connect(&url, TIMEOUT, 16).await.unwrap();
    drop(push);

    let result = tokio::time::timeout(TIMEOUT, transport.recv()).await.unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn send_after_disconnect_fails() {
    let backend = start_backend().await;
    let transport = WsTransport::connect(&backend.url, TIMEOUT, 16).await.unwrap();
    transport.disconnect();
    transport.disconnect();
    let err = transport
        .send(&OutboundEvent::MarkPrivateRead(vibetalk_proto::event::PeerRequest {
            requester_id: PeerId::new("me"),
            peer_id: PeerId::new("x"),
        }))
        .unwrap_err();
    assert!(matches!(err, TransportError::NotConnected | TransportError::ConnectionClosed));
}

#[tokio::test]
async fn spawned_session_registers_and_reports_disconnect() {
    let mut backend = start_backend().await;
    let identity = Identity::new(Profile::new("  Ana ", Avatar::preset(2).unwrap()).unwrap());
    let session_id = identity.peer_id().to_string();

    let (cmd_tx, mut events) = net::spawn_net(NetConfig::new(backend.url.clone()), identity)
        .await
        .unwrap();

    let register = next_frame(&mut backend).await;
    assert_eq!(register[0], "register_session");
    assert_eq!(register[1]["sessionId"], session_id.as_str());
    assert_eq!(register[1]["displayName"], "Ana");
    assert_eq!(register[1]["avatarRef"], "avatar2.png");

    cmd_tx
        .send(NetCommand::SendText { text: "hey".into() })
        .await
        .unwrap();
    let sent = next_frame(&mut backend).await;
    assert_eq!(sent[0], "send_global_message");
    assert_eq!(sent[1]["text"], "hey");

    drop(backend.push);
    loop {
        let event = tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
        if matches!(event, SessionEvent::Notice(vibetalk::state::Notice::Connectivity(_))) {
            break;
        }
    }
    cmd_tx.send(NetCommand::Shutdown).await.unwrap();
}
