//! Chat message types for the `VibeTalk` wire protocol.
//!
//! Inbound messages arrive as loosely-shaped JSON objects ([`WireMessage`])
//! whose field names vary between backend versions. They are validated into
//! the immutable [`ChatMessage`] before reaching any client state.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Caption sent alongside audio payloads for clients that cannot play them.
pub const AUDIO_CAPTION: &str = "[audio message]";

/// Identifier of a connected user, as issued by that user's own session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this peer ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier, unique within its conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this message ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a conversation: the shared global room or a private thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationId {
    /// The room every connected session takes part in.
    Global,
    /// The private conversation with one peer.
    Peer(PeerId),
}

impl ConversationId {
    /// Return `true` for the global room.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Return the peer of a private conversation.
    #[must_use]
    pub const fn peer(&self) -> Option<&PeerId> {
        match self {
            Self::Global => None,
            Self::Peer(peer) => Some(peer),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Peer(peer) => write!(f, "{peer}"),
        }
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

/// Integers below this are read as seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Converts to a `chrono` UTC date-time, if in range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Interprets an epoch number that may be in seconds or milliseconds.
    #[must_use]
    pub const fn from_epoch(value: i64) -> Self {
        if value.abs() < SECONDS_CUTOFF {
            Self(value.saturating_mul(1000))
        } else {
            Self(value)
        }
    }

    /// Parses the textual forms backends emit.
    ///
    /// Accepts RFC 3339 (`2024-05-01T12:30:00Z`), naive ISO-8601 without an
    /// offset (read as UTC, with or without fractional seconds), and decimal
    /// epoch numbers.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(epoch) = text.parse::<i64>() {
            return Some(Self::from_epoch(epoch));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Self(dt.timestamp_millis()));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .map(|naive| Self(naive.and_utc().timestamp_millis()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind tag carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Recorded audio, payload is a data URI.
    Audio,
}

impl MessageKind {
    /// Wire spelling of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Text content.
    Text(String),
    /// Audio content encoded as a `data:` URI.
    Audio {
        /// The encoded recording.
        data_uri: String,
        /// Text shown by clients that cannot play audio.
        caption: Option<String>,
    },
}

impl MessageBody {
    /// The wire kind of this body.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Audio { .. } => MessageKind::Audio,
        }
    }

    /// The payload: the text itself, or the audio data URI.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Audio { data_uri, .. } => data_uri,
        }
    }
}

/// A validated, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned identifier, when the backend provides one.
    pub id: Option<MessageId>,
    /// Who sent the message.
    pub sender_id: PeerId,
    /// Recipient of a private message; `None` for the global room.
    pub receiver_id: Option<PeerId>,
    /// Sender's display name at the time of sending.
    pub sender_name: String,
    /// Sender's avatar reference at the time of sending.
    pub sender_avatar: String,
    /// Text or audio content.
    pub body: MessageBody,
    /// Server-issued point in time, or local receipt time if none was sent.
    pub timestamp: Timestamp,
    /// Where `timestamp` came from.
    pub time_source: TimeSource,
}

/// Origin of a message timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeSource {
    /// Sent by the backend.
    #[default]
    Server,
    /// The backend sent none; the client stamped it on receipt.
    Receipt,
}

impl ChatMessage {
    /// The party of a private message that is not `local`.
    ///
    /// Returns `None` when `local` sent the message and no receiver is
    /// recorded, since the conversation cannot be determined.
    #[must_use]
    pub fn other_party(&self, local: &PeerId) -> Option<&PeerId> {
        if self.sender_id == *local {
            self.receiver_id.as_ref()
        } else {
            Some(&self.sender_id)
        }
    }

    /// The private conversation this message belongs to, seen from `local`.
    #[must_use]
    pub fn private_conversation(&self, local: &PeerId) -> Option<ConversationId> {
        self.other_party(local)
            .map(|peer| ConversationId::Peer(peer.clone()))
    }
}

/// A scalar that backends send either as a JSON string or number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireScalar {
    /// Integer form.
    Int(i64),
    /// Floating-point form (e.g. fractional epoch seconds).
    Float(f64),
    /// String form.
    Text(String),
}

impl WireScalar {
    /// Render as an identifier string.
    #[must_use]
    pub fn to_id_string(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Interpret as a timestamp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Int(n) => Some(Timestamp::from_epoch(*n)),
            Self::Float(f) if f.is_finite() => {
                if f.abs() < 1e11 {
                    Some(Timestamp::from_millis((f * 1000.0).round() as i64))
                } else {
                    Some(Timestamp::from_millis(f.round() as i64))
                }
            }
            Self::Float(_) => None,
            Self::Text(s) => Timestamp::parse(s),
        }
    }
}

/// A JSON object whose fields may arrive under several spellings.
///
/// [`take`](Self::take) reads the first listed spelling that is present and
/// not null; the others are ignored, so an object carrying both `senderId`
/// and `userId` is still accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct WireObject(Map<String, Value>);

impl WireObject {
    /// Remove and decode the first present field among `names`.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if that field has the wrong type.
    pub fn take<T: DeserializeOwned>(&mut self, names: &[&str]) -> Result<Option<T>, serde_json::Error> {
        for name in names {
            match self.0.remove(*name) {
                None | Some(Value::Null) => {}
                Some(value) => return serde_json::from_value(value).map(Some),
            }
        }
        Ok(None)
    }
}

/// A message object exactly as the backend sent it.
///
/// Every field is optional here; [`ChatMessage::try_from`] enforces the
/// required ones. Each field is read from the first spelling present, so
/// older and newer backend spellings may be mixed in one object.
#[derive(Debug, Clone, Default)]
pub struct WireMessage {
    /// Message identifier.
    pub id: Option<WireScalar>,
    /// Sender session id.
    pub sender_id: Option<WireScalar>,
    /// Recipient session id (private messages).
    pub receiver_id: Option<WireScalar>,
    /// Sender display name.
    pub display_name: Option<String>,
    /// Sender avatar reference.
    pub avatar_ref: Option<String>,
    /// Text content (or caption, for audio).
    pub text: Option<String>,
    /// `"text"` or `"audio"`.
    pub kind: Option<String>,
    /// Audio data URI.
    pub audio_data: Option<String>,
    /// Server timestamp.
    pub timestamp: Option<WireScalar>,
}

impl WireMessage {
    fn from_object(mut object: WireObject) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: object.take(&["id"])?,
            sender_id: object.take(&["senderId", "userId", "user_id", "sender_id"])?,
            receiver_id: object.take(&["receiverId", "receiver_id"])?,
            display_name: object.take(&[
                "displayName",
                "senderDisplayName",
                "username",
                "sender_username",
            ])?,
            avatar_ref: object.take(&["avatarRef", "senderAvatarRef", "avatar", "sender_avatar"])?,
            text: object.take(&["text", "message"])?,
            kind: object.take(&["kind", "type"])?,
            audio_data: object.take(&["audioData", "audio_data"])?,
            timestamp: object.take(&["timestamp"])?,
        })
    }
}

impl<'de> Deserialize<'de> for WireMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = WireObject::deserialize(deserializer)?;
        Self::from_object(object).map_err(de::Error::custom)
    }
}

/// Name of a required message field that was absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("missing required field `{0}`")]
pub struct MissingField(pub &'static str);

impl TryFrom<WireMessage> for ChatMessage {
    type Error = MissingField;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let sender_id = non_empty_id(wire.sender_id).ok_or(MissingField("senderId"))?;

        let body = if wire.kind.as_deref() == Some("audio") {
            let data_uri = wire
                .audio_data
                .filter(|uri| !uri.is_empty())
                .ok_or(MissingField("audioData"))?;
            MessageBody::Audio {
                data_uri,
                caption: wire.text,
            }
        } else {
            MessageBody::Text(wire.text.ok_or(MissingField("text"))?)
        };

        let (timestamp, time_source) = wire
            .timestamp
            .and_then(|ts| ts.to_timestamp())
            .map_or_else(
                || (Timestamp::now(), TimeSource::Receipt),
                |ts| (ts, TimeSource::Server),
            );

        Ok(Self {
            id: wire.id.map(|id| MessageId::new(id.to_id_string())),
            sender_id,
            receiver_id: non_empty_id(wire.receiver_id),
            sender_name: wire.display_name.unwrap_or_default(),
            sender_avatar: wire.avatar_ref.unwrap_or_default(),
            body,
            timestamp,
            time_source,
        })
    }
}

/// A non-empty identifier as a [`PeerId`].
#[must_use]
pub fn non_empty_id(id: Option<WireScalar>) -> Option<PeerId> {
    id.map(|id| id.to_id_string())
        .filter(|id| !id.is_empty())
        .map(PeerId::new)
}
