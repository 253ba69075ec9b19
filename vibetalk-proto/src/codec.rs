//! JSON frame codec for the `VibeTalk` wire protocol.
//!
//! Each WebSocket text frame holds one event as `["<name>", <payload>]`.
//! The object form `{"event": "<name>", "data": <payload>}` is accepted on
//! decode as well.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event::{EventName, InboundEvent, OutboundEvent, PrivateHistory, UnreadUpdate};
use crate::message::{
    ChatMessage, MissingField, PeerId, WireMessage, WireObject, WireScalar, non_empty_id,
};
use crate::presence::WirePeer;

/// Error returned when an inbound frame cannot be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON is not an event packet.
    #[error("frame is not an event packet")]
    NotAnEvent,
    /// The event name is not one this client handles.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// A required field is absent.
    #[error("{event}: missing required field `{field}`")]
    MissingField {
        /// Event being decoded.
        event: EventName,
        /// Name of the absent field.
        field: &'static str,
    },
    /// The payload has the wrong shape.
    #[error("{event}: invalid payload: {reason}")]
    InvalidPayload {
        /// Event being decoded.
        event: EventName,
        /// What was wrong with it.
        reason: String,
    },
}

/// Error returned when an outbound event cannot be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode `{event}`: {source}")]
pub struct EncodeError {
    /// Event being encoded.
    pub event: EventName,
    /// Underlying serializer error.
    #[source]
    pub source: serde_json::Error,
}

/// Encodes an [`OutboundEvent`] as a `["<name>", <payload>]` text frame.
///
/// # Errors
///
/// Returns [`EncodeError`] if the payload cannot be serialized.
pub fn encode(event: &OutboundEvent) -> Result<String, EncodeError> {
    let name = event.name();
    let result = match event {
        OutboundEvent::RegisterSession(p) => serde_json::to_string(&(name.as_str(), p)),
        OutboundEvent::SendGlobalMessage(p) => serde_json::to_string(&(name.as_str(), p)),
        OutboundEvent::SendPrivateMessage(p) => serde_json::to_string(&(name.as_str(), p)),
        OutboundEvent::RequestPrivateHistory(p) | OutboundEvent::MarkPrivateRead(p) => {
            serde_json::to_string(&(name.as_str(), p))
        }
    };
    result.map_err(|source| EncodeError { event: name, source })
}

/// Decodes one inbound text frame.
///
/// List payloads (presence, history) are decoded entry by entry: an entry
/// of the wrong shape is logged and skipped while the rest are kept. A
/// malformed single-message payload rejects the whole frame.
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is not JSON, not an event packet,
/// names an unknown event, or lacks required fields.
pub fn decode(frame: &str) -> Result<InboundEvent, DecodeError> {
    let value: Value = serde_json::from_str(frame)?;
    let (name, payload) = split_packet(value)?;
    let event = EventName::inbound_from_wire(&name).ok_or(DecodeError::UnknownEvent(name))?;

    match event {
        EventName::PresenceSnapshot => {
            let entries: Vec<Value> = from_payload(event, payload)?;
            let peers = list_entries::<WirePeer>(event, entries)
                .into_iter()
                .filter_map(|entry| {
                    let peer = entry.into_peer();
                    if peer.is_none() {
                        tracing::warn!(%event, "dropping presence entry without a peer id");
                    }
                    peer
                })
                .collect();
            Ok(InboundEvent::PresenceSnapshot(peers))
        }
        EventName::GlobalHistory => {
            let entries: Vec<Value> = from_payload(event, payload)?;
            Ok(InboundEvent::GlobalHistory(valid_messages(event, entries)))
        }
        EventName::GlobalMessage => Ok(InboundEvent::GlobalMessage(single_message(event, payload)?)),
        EventName::PrivateMessage => {
            Ok(InboundEvent::PrivateMessage(single_message(event, payload)?))
        }
        EventName::PrivateHistory => decode_private_history(event, payload),
        EventName::UnreadSnapshot => decode_unread_snapshot(event, payload),
        EventName::UnreadUpdate => {
            let mut object: WireObject = from_payload(event, payload)?;
            let peer_id = required_peer(event, &mut object)?;
            let count = field::<WireScalar>(event, &mut object, &["count"])?
                .as_ref()
                .and_then(scalar_count)
                .ok_or(DecodeError::MissingField {
                    event,
                    field: "count",
                })?;
            let as_of = field::<WireScalar>(event, &mut object, &["asOf", "as_of"])?;
            Ok(InboundEvent::UnreadUpdate(UnreadUpdate {
                peer_id,
                count,
                as_of: as_of.and_then(|ts| ts.to_timestamp()),
            }))
        }
        EventName::UnreadCleared => {
            let mut object: WireObject = from_payload(event, payload)?;
            Ok(InboundEvent::UnreadCleared {
                peer_id: required_peer(event, &mut object)?,
            })
        }
        EventName::RegisterSession
        | EventName::SendGlobalMessage
        | EventName::SendPrivateMessage
        | EventName::RequestPrivateHistory
        | EventName::MarkPrivateRead => Err(DecodeError::UnknownEvent(event.to_string())),
    }
}

fn split_packet(value: Value) -> Result<(String, Value), DecodeError> {
    match value {
        Value::Array(mut items) if !items.is_empty() => {
            let payload = if items.len() > 1 {
                items.swap_remove(1)
            } else {
                Value::Null
            };
            match items.swap_remove(0) {
                Value::String(name) => Ok((name, payload)),
                _ => Err(DecodeError::NotAnEvent),
            }
        }
        Value::Object(mut map) => match map.remove("event") {
            Some(Value::String(name)) => Ok((name, map.remove("data").unwrap_or(Value::Null))),
            _ => Err(DecodeError::NotAnEvent),
        },
        _ => Err(DecodeError::NotAnEvent),
    }
}

fn from_payload<T: DeserializeOwned>(event: EventName, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

fn field<T: DeserializeOwned>(
    event: EventName,
    object: &mut WireObject,
    names: &[&str],
) -> Result<Option<T>, DecodeError> {
    object.take(names).map_err(|e| DecodeError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

/// Decode each list entry on its own, skipping the ones of the wrong shape.
fn list_entries<T: DeserializeOwned>(event: EventName, entries: Vec<Value>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(%event, error = %e, "dropping malformed list entry");
                None
            }
        })
        .collect()
}

fn single_message(event: EventName, payload: Value) -> Result<ChatMessage, DecodeError> {
    let wire: WireMessage = from_payload(event, payload)?;
    ChatMessage::try_from(wire).map_err(|MissingField(field)| DecodeError::MissingField { event, field })
}

fn valid_messages(event: EventName, entries: Vec<Value>) -> Vec<ChatMessage> {
    list_entries::<WireMessage>(event, entries)
        .into_iter()
        .filter_map(|wire| match ChatMessage::try_from(wire) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(%event, error = %e, "dropping malformed history entry");
                None
            }
        })
        .collect()
}

fn decode_private_history(event: EventName, payload: Value) -> Result<InboundEvent, DecodeError> {
    // Older backends send the message list bare.
    let (entries, peer_id) = if payload.is_array() {
        (from_payload::<Vec<Value>>(event, payload)?, None)
    } else {
        let mut object: WireObject = from_payload(event, payload)?;
        let messages = field::<Vec<Value>>(event, &mut object, &["messages"])?.unwrap_or_default();
        (messages, field::<WireScalar>(event, &mut object, &["peerId", "peer_id"])?)
    };
    Ok(InboundEvent::PrivateHistory(PrivateHistory {
        peer_id: non_empty_id(peer_id),
        messages: valid_messages(event, entries),
    }))
}

fn decode_unread_snapshot(event: EventName, payload: Value) -> Result<InboundEvent, DecodeError> {
    let Value::Object(map) = payload else {
        return Err(DecodeError::InvalidPayload {
            event,
            reason: "expected an object of peer counts".into(),
        });
    };
    let mut counts = BTreeMap::new();
    for (peer, raw) in map {
        let count = serde_json::from_value::<WireScalar>(raw)
            .ok()
            .as_ref()
            .and_then(scalar_count);
        match count {
            Some(0) => {}
            Some(count) if !peer.is_empty() => {
                counts.insert(PeerId::new(peer), count);
            }
            _ => tracing::warn!(%event, peer = %peer, "dropping invalid unread entry"),
        }
    }
    Ok(InboundEvent::UnreadSnapshot(counts))
}

fn required_peer(event: EventName, object: &mut WireObject) -> Result<PeerId, DecodeError> {
    let peer = field::<WireScalar>(event, object, &["peerId", "senderId", "sender_id", "peer_id"])?;
    non_empty_id(peer).ok_or(DecodeError::MissingField {
        event,
        field: "peerId",
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scalar_count(value: &WireScalar) -> Option<u32> {
    match value {
        WireScalar::Int(n) => u32::try_from(*n).ok(),
        WireScalar::Float(f) if f.is_finite() && *f >= 0.0 && f.fract() == 0.0 => {
            (*f <= f64::from(u32::MAX)).then_some(*f as u32)
        }
        WireScalar::Float(_) => None,
        WireScalar::Text(s) => s.trim().parse().ok(),
    }
}
