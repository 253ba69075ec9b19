//! End-to-end session behavior over the loopback transport.
//!
//! Frames are pushed as raw JSON so decoding, state transitions, outbound
//! events and published session events are exercised together.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use vibetalk::identity::{Avatar, Identity, Profile};
use vibetalk::net::{self, NetCommand, NetConfig};
use vibetalk::session::{ChatSession, Submission};
use vibetalk::state::{Notice, SessionEvent};
use vibetalk::transport::Transport;
use vibetalk::transport::loopback::{LoopbackBackend, LoopbackTransport};
use vibetalk_proto::event::{OutboundEvent, PeerRequest};
use vibetalk_proto::message::{ChatMessage, ConversationId, MessageKind, PeerId};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    session: ChatSession<LoopbackTransport>,
    events: mpsc::Receiver<SessionEvent>,
    backend: LoopbackBackend,
}

impl Harness {
    fn new() -> Self {
        let (transport, backend) = LoopbackTransport::create_pair(64);
        let identity = Identity::new(Profile::new("Ana", Avatar::preset(3).unwrap()).unwrap());
        let (session, events) = ChatSession::new(identity, Arc::new(transport), 256);
        Self {
            session,
            events,
            backend,
        }
    }

    fn me(&self) -> PeerId {
        self.session.identity().peer_id().clone()
    }

    /// Push one frame through the transport and apply it.
    async fn deliver(&mut self, frame: Value) {
        assert!(
            self.backend.push_frame(&frame.to_string()).await.unwrap(),
            "frame rejected: {frame}"
        );
        let event = tokio::time::timeout(TIMEOUT, self.session.transport().recv())
            .await
            .unwrap()
            .unwrap();
        self.session.handle_inbound(event);
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn unread(&self, peer: &str) -> u32 {
        self.session.state().unread().count(&PeerId::new(peer))
    }

    fn texts(&self, conversation: &ConversationId) -> Vec<String> {
        self.session
            .state()
            .store()
            .get(conversation)
            .iter()
            .map(|m| m.body.payload().to_string())
            .collect()
    }
}

fn user(id: &str, name: &str) -> Value {
    json!({"peerId": id, "displayName": name, "avatarRef": "avatar1.png"})
}

fn global(id: u64, sender: &str, text: &str) -> Value {
    json!({
        "id": id,
        "senderId": sender,
        "displayName": sender,
        "avatarRef": "avatar2.png",
        "text": text,
        "kind": "text",
        "timestamp": 1_700_000_000_000_u64 + id,
    })
}

fn private(id: u64, sender: &str, receiver: &str, text: &str) -> Value {
    let mut message = global(id, sender, text);
    message["receiverId"] = json!(receiver);
    message
}

#[tokio::test]
async fn presence_snapshot_replaces_peer_list() {
    let mut h = Harness::new();
    let me = h.me();
    h.deliver(json!(["presence_snapshot", [user("a", "A"), user("b", "B"), user(me.as_str(), "Ana")]]))
        .await;
    let ids: Vec<_> = h.session.state().presence().peers().iter().map(|p| p.peer_id.clone()).collect();
    assert_eq!(ids, [PeerId::new("a"), PeerId::new("b")]);

    h.deliver(json!(["online_users_update", [user("b", "B")]])).await;
    let ids: Vec<_> = h.session.state().presence().peers().iter().map(|p| p.peer_id.clone()).collect();
    assert_eq!(ids, [PeerId::new("b")]);
}

#[tokio::test]
async fn history_with_a_wrong_typed_entry_still_fills_the_room() {
    let mut h = Harness::new();
    h.session.start();
    let mut broken = global(2, "b", "x");
    broken["text"] = json!(5);
    let mut mixed = global(3, "c", "three");
    mixed["userId"] = json!("c");
    h.deliver(json!(["global_history", [global(1, "a", "one"), broken, mixed]]))
        .await;
    assert_eq!(h.texts(&ConversationId::Global), ["one", "three"]);

    h.deliver(json!(["presence_snapshot", [user("a", "A"), {"peerId": 7}, {"peerId": []}]]))
        .await;
    let ids: Vec<_> = h.session.state().presence().peers().iter().map(|p| p.peer_id.clone()).collect();
    assert_eq!(ids, [PeerId::new("a"), PeerId::new("7")]);
}

#[tokio::test]
async fn private_messages_count_until_conversation_opens() {
    let mut h = Harness::new();
    let me = h.me();
    h.deliver(json!(["private_message", private(1, "x", me.as_str(), "one")])).await;
    assert_eq!(h.unread("x"), 1);
    h.deliver(json!(["private_message", private(2, "x", me.as_str(), "two")])).await;
    assert_eq!(h.unread("x"), 2);

    h.session.activate(ConversationId::Peer(PeerId::new("x")));
    assert_eq!(h.unread("x"), 0);

    let request = PeerRequest {
        requester_id: me,
        peer_id: PeerId::new("x"),
    };
    let sent = h.backend.drain_sent();
    assert!(sent.contains(&OutboundEvent::RequestPrivateHistory(request.clone())));
    assert!(sent.contains(&OutboundEvent::MarkPrivateRead(request)));
}

#[tokio::test]
async fn whitespace_submission_sends_nothing() {
    let mut h = Harness::new();
    h.session.set_draft(" \t ");
    assert_eq!(h.session.submit_text(), Submission::Empty);
    assert_eq!(h.session.composer().draft(), " \t ");
    assert!(h.backend.try_next_sent().is_none());
}

#[tokio::test]
async fn live_global_message_follows_history() {
    let mut h = Harness::new();
    h.session.start();
    h.deliver(json!([
        "global_history",
        [global(1, "a", "m1"), global(2, "b", "m2"), global(3, "a", "m3")]
    ]))
    .await;
    h.deliver(json!(["global_message", global(4, "b", "m4")])).await;
    assert_eq!(h.texts(&ConversationId::Global), ["m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn live_message_before_history_is_kept() {
    let mut h = Harness::new();
    h.session.start();
    h.deliver(json!(["global_message", global(9, "b", "early")])).await;
    h.deliver(json!(["global_messages_history", [global(1, "a", "old"), global(9, "b", "early")]]))
        .await;
    assert_eq!(h.texts(&ConversationId::Global), ["old", "early"]);
}

#[tokio::test]
async fn stale_unread_push_after_clear_is_ignored() {
    let mut h = Harness::new();
    let me = h.me();
    h.deliver(json!(["private_message", private(1, "x", me.as_str(), "hey")])).await;
    h.session.activate(ConversationId::Peer(PeerId::new("x")));
    h.session.activate(ConversationId::Global);

    // Computed before the clear reached the server.
    h.deliver(json!(["private_notification", {"senderId": "x", "count": 1, "asOf": 1000}]))
        .await;
    assert_eq!(h.unread("x"), 0);

    h.deliver(json!(["private_notification_cleared", {"peerId": "x"}])).await;
    h.deliver(json!(["unread_update", {"peerId": "x", "count": 2}])).await;
    assert_eq!(h.unread("x"), 2);
}

#[tokio::test]
async fn active_peer_stays_at_zero() {
    let mut h = Harness::new();
    h.session.activate(ConversationId::Peer(PeerId::new("x")));
    h.backend.drain_sent();

    h.deliver(json!(["unread_update", {"peerId": "x", "count": 4}])).await;
    assert_eq!(h.unread("x"), 0);
    assert!(matches!(
        h.backend.try_next_sent(),
        Some(OutboundEvent::MarkPrivateRead(_))
    ));

    h.deliver(json!(["unread_snapshot", {"x": 2, "y": 1}])).await;
    assert_eq!(h.unread("x"), 0);
    assert_eq!(h.unread("y"), 1);
}

#[tokio::test]
async fn private_reply_arriving_during_history_request_survives() {
    let mut h = Harness::new();
    let me = h.me();
    let conversation = ConversationId::Peer(PeerId::new("x"));
    h.session.activate(conversation.clone());

    h.deliver(json!(["private_message", private(7, "x", me.as_str(), "live")])).await;
    h.deliver(json!([
        "private_history",
        {"peerId": "x", "messages": [private(5, me.as_str(), "x", "older")]}
    ]))
    .await;
    assert_eq!(h.texts(&conversation), ["older", "live"]);
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let mut h = Harness::new();
    assert!(!h.backend.push_frame("not json").await.unwrap());
    assert!(!h.backend.push_frame(r#"["global_message",{"text":"no sender"}]"#).await.unwrap());
    h.deliver(json!(["global_message", global(1, "a", "fine")])).await;
    assert_eq!(h.texts(&ConversationId::Global), ["fine"]);
}

#[tokio::test]
async fn send_after_disconnect_reports_notice() {
    let mut h = Harness::new();
    h.session.logout();
    h.session.set_draft("anyone?");
    assert_eq!(h.session.submit_text(), Submission::Dropped);
    assert_eq!(h.session.composer().draft(), "");
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::Notice(Notice::Connectivity(_)))));
}

// -- Spawned session task ---------------------------------------------------

async fn transcript(cmd_tx: &mpsc::Sender<NetCommand>, conversation: ConversationId) -> Vec<ChatMessage> {
    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(NetCommand::Transcript {
            conversation,
            reply,
        })
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, rx).await.unwrap().unwrap()
}

#[tokio::test]
async fn spawned_session_sends_text_and_serves_transcripts() {
    let Harness {
        mut session,
        mut events,
        mut backend,
    } = Harness::new();
    session.start();
    let cmd_tx = net::spawn_session(session, &NetConfig::new("ws://unused".into()));

    assert!(matches!(
        backend.next_sent().await,
        Some(OutboundEvent::RegisterSession(_))
    ));

    cmd_tx
        .send(NetCommand::SendText {
            text: "hello all".into(),
        })
        .await
        .unwrap();
    let Some(OutboundEvent::SendGlobalMessage(msg)) = backend.next_sent().await else {
        panic!("expected send_global_message");
    };
    assert_eq!(msg.text, "hello all");
    assert_eq!(msg.kind, MessageKind::Text);

    backend
        .push_frame(&json!(["global_history", [global(1, "a", "m1")]]).to_string())
        .await
        .unwrap();
    loop {
        let event = tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
        if matches!(event, SessionEvent::HistoryReplaced { .. }) {
            break;
        }
    }
    let messages = transcript(&cmd_tx, ConversationId::Global).await;
    assert_eq!(messages.len(), 1);

    cmd_tx.send(NetCommand::Shutdown).await.unwrap();
    tokio::time::timeout(TIMEOUT, cmd_tx.closed()).await.unwrap();
}

#[tokio::test]
async fn spawned_session_records_and_sends_audio() {
    let path = std::env::temp_dir().join(format!("vibetalk-flow-{}.ogg", uuid::Uuid::now_v7()));
    tokio::fs::write(&path, b"OggS fake audio").await.unwrap();

    let Harness {
        mut session,
        mut events,
        mut backend,
    } = Harness::new();
    session.activate(ConversationId::Peer(PeerId::new("x")));
    let cmd_tx = net::spawn_session(session, &NetConfig::new("ws://unused".into()));
    backend.drain_sent();

    cmd_tx
        .send(NetCommand::StartRecording { path: path.clone() })
        .await
        .unwrap();
    loop {
        let event = tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
        if matches!(event, SessionEvent::Notice(Notice::Info(ref text)) if text.starts_with("recording")) {
            break;
        }
    }
    // Give the file reader a moment to deliver its only chunk.
    tokio::time::sleep(Duration::from_millis(100)).await;
    cmd_tx.send(NetCommand::StopRecording).await.unwrap();

    let sent = tokio::time::timeout(TIMEOUT, backend.next_sent()).await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();
    let Some(OutboundEvent::SendPrivateMessage(msg)) = sent else {
        panic!("expected send_private_message, got {sent:?}");
    };
    assert_eq!(msg.receiver_id, PeerId::new("x"));
    assert_eq!(msg.kind, MessageKind::Audio);
    assert!(msg.audio_data.unwrap().starts_with("data:audio/ogg;base64,"));
}

#[tokio::test]
async fn second_recording_is_rejected_and_cancel_sends_nothing() {
    let mut h = Harness::new();
    assert!(h.session.begin_recording().is_some());
    assert!(h.session.begin_recording().is_none());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::Notice(Notice::Capture(_)))));

    assert!(h.session.cancel_recording());
    assert!(h.session.stop_recording().is_none());
    assert!(h.backend.try_next_sent().is_none());
}
