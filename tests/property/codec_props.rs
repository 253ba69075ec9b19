//! Property-based tests for the inbound frame codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never causes a panic in `decode`.
//! 2. Message text and sender survive any of the accepted field spellings.
//! 3. Epoch timestamps normalize to milliseconds whether sent as seconds or ms.
//! 4. Unread snapshots never contain zero counts.

use proptest::prelude::*;
use serde_json::json;
use vibetalk_proto::codec;
use vibetalk_proto::event::InboundEvent;
use vibetalk_proto::message::{PeerId, Timestamp};

// --- Strategies ---

/// Non-empty peer ids as issued by other sessions.
fn arb_peer_id() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,24}"
}

/// Any of the sender-field spellings different backends use.
fn arb_sender_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("senderId"), Just("userId"), Just("user_id"), Just("sender_id")]
}

/// Either text-field spelling.
fn arb_text_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("text"), Just("message")]
}

// --- Property tests ---

proptest! {
    /// Arbitrary strings decode to `Ok` or `Err`, never a panic.
    #[test]
    fn arbitrary_text_decode_no_panic(frame in ".{0,256}") {
        let _ = codec::decode(&frame);
    }

    /// Arbitrary JSON event packets with junk payloads never panic.
    #[test]
    fn junk_payload_decode_no_panic(
        name in prop_oneof![
            Just("global_message"),
            Just("private_history"),
            Just("unread_notifications"),
            Just("online_users_update"),
            Just("private_notification"),
        ],
        payload in ".{0,64}",
    ) {
        let frame = json!([name, payload]).to_string();
        let _ = codec::decode(&frame);
    }

    /// Sender and text survive every accepted spelling.
    #[test]
    fn message_fields_survive_spellings(
        sender in arb_peer_id(),
        text in ".{0,128}",
        sender_key in arb_sender_key(),
        text_key in arb_text_key(),
    ) {
        let frame = json!(["global_message", { sender_key: sender, text_key: text, "timestamp": 1 }])
            .to_string();
        let event = codec::decode(&frame).expect("well-formed message should decode");
        let InboundEvent::GlobalMessage(msg) = event else {
            panic!("expected a global message");
        };
        prop_assert_eq!(msg.sender_id, PeerId::new(sender));
        prop_assert_eq!(msg.body.payload(), text.as_str());
    }

    /// Seconds and milliseconds denote the same instant.
    #[test]
    fn epoch_seconds_and_millis_agree(secs in 1_000_000_000i64..4_000_000_000i64) {
        prop_assert_eq!(Timestamp::from_epoch(secs), Timestamp::from_epoch(secs * 1000));
    }

    /// Unread snapshots hold only positive counts.
    #[test]
    fn unread_snapshot_has_no_zero_counts(
        counts in prop::collection::btree_map(arb_peer_id(), 0u32..5, 0..8),
    ) {
        let frame = json!(["unread_snapshot", counts]).to_string();
        let event = codec::decode(&frame).expect("snapshot should decode");
        let InboundEvent::UnreadSnapshot(map) = event else {
            panic!("expected an unread snapshot");
        };
        prop_assert!(map.values().all(|&count| count > 0));
        prop_assert_eq!(map.len(), counts.values().filter(|&&c| c > 0).count());
    }
}
