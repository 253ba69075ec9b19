//! Property-based tests for conversation history and unread counters.
//!
//! Uses proptest to verify:
//! 1. Live appends keep each message id once, in first-seen order.
//! 2. A history reply followed by replays of its messages adds nothing.
//! 3. Live messages racing a history request survive the reply.
//! 4. The active peer's unread count is zero under any push sequence.

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;
use vibetalk::conversation::ConversationStore;
use vibetalk::notify::NotificationTracker;
use vibetalk_proto::event::UnreadUpdate;
use vibetalk_proto::message::{
    ChatMessage, ConversationId, MessageBody, MessageId, PeerId, TimeSource, Timestamp,
};

// --- Strategies ---

fn message(id: u8) -> ChatMessage {
    ChatMessage {
        id: Some(MessageId::new(format!("m{id}"))),
        sender_id: PeerId::new(format!("p{}", id % 3)),
        receiver_id: None,
        sender_name: String::new(),
        sender_avatar: String::new(),
        body: MessageBody::Text(format!("text {id}")),
        timestamp: Timestamp::from_millis(i64::from(id)),
        time_source: TimeSource::Server,
    }
}

/// Message ids with plenty of repeats.
fn arb_ids() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..20, 0..60)
}

#[derive(Debug, Clone)]
enum Push {
    Update { peer: u8, count: u32, as_of: Option<i64> },
    Snapshot(Vec<(u8, u32)>),
    Cleared(u8),
    Message(u8),
}

fn arb_push() -> impl Strategy<Value = Push> {
    prop_oneof![
        (0u8..4, 0u32..5, proptest::option::of(0i64..4_000_000_000_000))
            .prop_map(|(peer, count, as_of)| Push::Update { peer, count, as_of }),
        prop::collection::vec((0u8..4, 0u32..5), 0..4).prop_map(Push::Snapshot),
        (0u8..4).prop_map(Push::Cleared),
        (0u8..4).prop_map(Push::Message),
    ]
}

fn peer(n: u8) -> PeerId {
    PeerId::new(format!("peer{n}"))
}

fn ids_of(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.id.as_ref().map(|id| id.as_str().to_string()).unwrap_or_default())
        .collect()
}

fn first_seen(ids: &[u8]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .map(|id| format!("m{id}"))
        .collect()
}

// --- Property tests ---

proptest! {
    /// Duplicate live deliveries collapse to the first occurrence.
    #[test]
    fn live_appends_dedup_in_first_seen_order(ids in arb_ids()) {
        let mut store = ConversationStore::new();
        for id in &ids {
            store.append_live(&ConversationId::Global, message(*id));
        }
        prop_assert_eq!(ids_of(store.get(&ConversationId::Global)), first_seen(&ids));
    }

    /// Replaying messages already in a history reply adds nothing.
    #[test]
    fn history_then_replay_has_no_duplicates(history in arb_ids(), replay in arb_ids()) {
        let conversation = ConversationId::Peer(PeerId::new("x"));
        let mut store = ConversationStore::new();
        store.replace_history(&conversation, history.iter().map(|id| message(*id)).collect());
        let before = ids_of(store.get(&conversation));

        let known: HashSet<_> = history.iter().copied().collect();
        for id in replay.iter().filter(|id| known.contains(id)) {
            store.append_live(&conversation, message(*id));
        }
        prop_assert_eq!(ids_of(store.get(&conversation)), before);
    }

    /// Whatever arrives while history is pending is still there afterwards.
    #[test]
    fn pending_live_messages_survive_reply(history in arb_ids(), live in arb_ids()) {
        let conversation = ConversationId::Peer(PeerId::new("x"));
        let mut store = ConversationStore::new();
        store.begin_history_request(&conversation);
        for id in &live {
            store.append_live(&conversation, message(*id));
        }
        store.replace_history(&conversation, history.iter().map(|id| message(*id)).collect());

        let result: HashSet<_> = ids_of(store.get(&conversation)).into_iter().collect();
        for id in history.iter().chain(&live) {
            let key = format!("m{id}");
            prop_assert!(result.contains(&key));
        }
        let mut expected = history.clone();
        expected.extend(&live);
        prop_assert_eq!(ids_of(store.get(&conversation)), first_seen(&expected));
    }

    /// The active peer never shows unread messages.
    #[test]
    fn active_peer_unread_stays_zero(pushes in prop::collection::vec(arb_push(), 0..40)) {
        let active = peer(0);
        let mut tracker = NotificationTracker::new();
        tracker.clear_local(&active, Timestamp::from_millis(2_000_000_000_000));

        for push in pushes {
            match push {
                Push::Update { peer: p, count, as_of } => {
                    tracker.apply_update(
                        &UnreadUpdate {
                            peer_id: peer(p),
                            count,
                            as_of: as_of.map(Timestamp::from_millis),
                        },
                        Some(&active),
                    );
                }
                Push::Snapshot(entries) => {
                    let map: BTreeMap<_, _> = entries.into_iter().map(|(p, c)| (peer(p), c)).collect();
                    tracker.apply_snapshot(map, Some(&active));
                }
                Push::Cleared(p) => {
                    tracker.apply_cleared(&peer(p));
                }
                Push::Message(p) => {
                    tracker.record_message(&peer(p), Some(&active));
                }
            }
            prop_assert_eq!(tracker.count(&active), 0);
            prop_assert!(tracker.counts().values().all(|&c| c > 0));
        }
    }
}
