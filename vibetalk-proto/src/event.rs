//! Named events exchanged with the chat backend.
//!
//! Every frame carries an event name and a JSON payload. Outbound payloads
//! use camelCase keys; inbound payloads are decoded leniently by
//! [`crate::codec::decode`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::message::{ChatMessage, MessageKind, PeerId, Timestamp};
use crate::presence::PeerUser;

/// Every event name the protocol knows, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    // -- outbound --
    /// Announce the session to the backend.
    RegisterSession,
    /// Post to the global room.
    SendGlobalMessage,
    /// Post to one peer.
    SendPrivateMessage,
    /// Ask for the history of a private conversation.
    RequestPrivateHistory,
    /// Tell the backend a private conversation has been read.
    MarkPrivateRead,
    // -- inbound --
    /// Full list of online peers.
    PresenceSnapshot,
    /// Full history of the global room.
    GlobalHistory,
    /// One new global message.
    GlobalMessage,
    /// One new private message.
    PrivateMessage,
    /// Full history of one private conversation.
    PrivateHistory,
    /// Full unread map.
    UnreadSnapshot,
    /// Unread count for one peer.
    UnreadUpdate,
    /// Unread count for one peer reset by the backend.
    UnreadCleared,
}

impl EventName {
    /// All inbound event names, in dispatch-table order.
    pub const INBOUND: [Self; 8] = [
        Self::PresenceSnapshot,
        Self::GlobalHistory,
        Self::GlobalMessage,
        Self::PrivateMessage,
        Self::PrivateHistory,
        Self::UnreadSnapshot,
        Self::UnreadUpdate,
        Self::UnreadCleared,
    ];

    /// Canonical wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegisterSession => "register_session",
            Self::SendGlobalMessage => "send_global_message",
            Self::SendPrivateMessage => "send_private_message",
            Self::RequestPrivateHistory => "request_private_history",
            Self::MarkPrivateRead => "mark_private_read",
            Self::PresenceSnapshot => "presence_snapshot",
            Self::GlobalHistory => "global_history",
            Self::GlobalMessage => "global_message",
            Self::PrivateMessage => "private_message",
            Self::PrivateHistory => "private_history",
            Self::UnreadSnapshot => "unread_snapshot",
            Self::UnreadUpdate => "unread_update",
            Self::UnreadCleared => "unread_cleared",
        }
    }

    /// Resolve an inbound event name, including legacy backend spellings.
    #[must_use]
    pub fn inbound_from_wire(name: &str) -> Option<Self> {
        let event = match name {
            "presence_snapshot" | "online_users_update" => Self::PresenceSnapshot,
            "global_history" | "global_messages_history" => Self::GlobalHistory,
            "global_message" => Self::GlobalMessage,
            "private_message" => Self::PrivateMessage,
            "private_history" | "private_messages_history" => Self::PrivateHistory,
            "unread_snapshot" | "unread_notifications" => Self::UnreadSnapshot,
            "unread_update" | "private_notification" => Self::UnreadUpdate,
            "unread_cleared" | "private_notification_cleared" => Self::UnreadCleared,
            _ => return None,
        };
        Some(event)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply to a private history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateHistory {
    /// The peer whose conversation this is, when the backend says so.
    pub peer_id: Option<PeerId>,
    /// Messages in server order.
    pub messages: Vec<ChatMessage>,
}

/// Unread count for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadUpdate {
    /// The peer whose messages are unread.
    pub peer_id: PeerId,
    /// New count; zero means read.
    pub count: u32,
    /// Server time the count was computed at, when provided.
    pub as_of: Option<Timestamp>,
}

/// Events pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Replace the online-peer list.
    PresenceSnapshot(Vec<PeerUser>),
    /// Replace the global room history.
    GlobalHistory(Vec<ChatMessage>),
    /// Append to the global room.
    GlobalMessage(ChatMessage),
    /// Append to a private conversation.
    PrivateMessage(ChatMessage),
    /// Replace a private conversation history.
    PrivateHistory(PrivateHistory),
    /// Replace the unread map.
    UnreadSnapshot(BTreeMap<PeerId, u32>),
    /// Set one unread count.
    UnreadUpdate(UnreadUpdate),
    /// Clear one unread count.
    UnreadCleared {
        /// The peer whose count was reset.
        peer_id: PeerId,
    },
}

impl InboundEvent {
    /// The event name this value was decoded from.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::PresenceSnapshot(_) => EventName::PresenceSnapshot,
            Self::GlobalHistory(_) => EventName::GlobalHistory,
            Self::GlobalMessage(_) => EventName::GlobalMessage,
            Self::PrivateMessage(_) => EventName::PrivateMessage,
            Self::PrivateHistory(_) => EventName::PrivateHistory,
            Self::UnreadSnapshot(_) => EventName::UnreadSnapshot,
            Self::UnreadUpdate(_) => EventName::UnreadUpdate,
            Self::UnreadCleared { .. } => EventName::UnreadCleared,
        }
    }
}

/// Payload of `register_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSession {
    /// Local session id.
    pub session_id: PeerId,
    /// Profile name.
    pub display_name: String,
    /// Profile avatar.
    pub avatar_ref: String,
}

/// Payload of `send_global_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMessageOut {
    /// Local session id.
    pub session_id: PeerId,
    /// Profile name.
    pub display_name: String,
    /// Profile avatar.
    pub avatar_ref: String,
    /// Text content, or the caption of an audio message.
    pub text: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Audio data URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
}

/// Payload of `send_private_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageOut {
    /// Local session id.
    pub sender_id: PeerId,
    /// Target peer.
    pub receiver_id: PeerId,
    /// Profile name.
    pub sender_display_name: String,
    /// Profile avatar.
    pub sender_avatar_ref: String,
    /// Text content, or the caption of an audio message.
    pub text: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Audio data URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
}

/// Payload of `request_private_history` and `mark_private_read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRequest {
    /// Local session id.
    pub requester_id: PeerId,
    /// The other side of the conversation.
    pub peer_id: PeerId,
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// `register_session`.
    RegisterSession(RegisterSession),
    /// `send_global_message`.
    SendGlobalMessage(GlobalMessageOut),
    /// `send_private_message`.
    SendPrivateMessage(PrivateMessageOut),
    /// `request_private_history`.
    RequestPrivateHistory(PeerRequest),
    /// `mark_private_read`.
    MarkPrivateRead(PeerRequest),
}

impl OutboundEvent {
    /// The event name this value is sent under.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::RegisterSession(_) => EventName::RegisterSession,
            Self::SendGlobalMessage(_) => EventName::SendGlobalMessage,
            Self::SendPrivateMessage(_) => EventName::SendPrivateMessage,
            Self::RequestPrivateHistory(_) => EventName::RequestPrivateHistory,
            Self::MarkPrivateRead(_) => EventName::MarkPrivateRead,
        }
    }

    /// The peer a private event concerns, if any.
    #[must_use]
    pub const fn peer(&self) -> Option<&PeerId> {
        match self {
            Self::SendPrivateMessage(out) => Some(&out.receiver_id),
            Self::RequestPrivateHistory(req) | Self::MarkPrivateRead(req) => Some(&req.peer_id),
            Self::RegisterSession(_) | Self::SendGlobalMessage(_) => None,
        }
    }
}
