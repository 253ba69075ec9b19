//! Per-conversation message history.
//!
//! Each conversation is an arrival-ordered, deduplicated list of messages.
//! The global room always exists; private conversations are created on
//! first access. Bulk history replies define a prefix, and live messages
//! that raced ahead of an outstanding history request are re-appended after
//! it so nothing seen on screen disappears.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use vibetalk_proto::event::PrivateHistory;
use vibetalk_proto::message::{
    ChatMessage, ConversationId, MessageId, PeerId, TimeSource, Timestamp,
};

/// Identity used to recognize a message delivered more than once.
///
/// The fallback form only narrows the search: messages sharing it are
/// compared body to body before one is treated as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Server-assigned id.
    Id(MessageId),
    /// Fallback when the backend sent no id.
    Identity {
        /// Sender of the message.
        sender: PeerId,
        /// Server timestamp; `None` when the client stamped it on receipt.
        timestamp: Option<Timestamp>,
        /// Hash of kind and payload.
        payload_hash: u64,
    },
}

impl DedupKey {
    /// Compute the key for `message`.
    #[must_use]
    pub fn of(message: &ChatMessage) -> Self {
        message.id.as_ref().map_or_else(
            || {
                let mut hasher = DefaultHasher::new();
                message.body.kind().hash(&mut hasher);
                message.body.payload().hash(&mut hasher);
                Self::Identity {
                    sender: message.sender_id.clone(),
                    timestamp: (message.time_source == TimeSource::Server)
                        .then_some(message.timestamp),
                    payload_hash: hasher.finish(),
                }
            },
            |id| Self::Id(id.clone()),
        )
    }
}

/// Whether a conversation's history has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    /// No request has been made.
    NotRequested,
    /// A request is outstanding.
    Pending,
    /// A reply has been applied.
    Loaded,
}

#[derive(Debug)]
enum HistoryState {
    NotRequested,
    /// Live arrivals since the request went out, in arrival order.
    Pending { buffer: Vec<ChatMessage> },
    Loaded,
}

#[derive(Debug)]
struct Conversation {
    messages: Vec<ChatMessage>,
    /// Positions in `messages` under each key.
    keys: HashMap<DedupKey, Vec<usize>>,
    history: HistoryState,
}

impl Conversation {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            keys: HashMap::new(),
            history: HistoryState::NotRequested,
        }
    }

    fn push(&mut self, message: ChatMessage) -> bool {
        let slots = self.keys.entry(DedupKey::of(&message)).or_default();
        let duplicate = slots.iter().any(|&slot| {
            let seen = &self.messages[slot];
            seen.id.is_some() || seen.body == message.body
        });
        if duplicate {
            return false;
        }
        slots.push(self.messages.len());
        self.messages.push(message);
        true
    }
}

/// Message history for every conversation of the session.
#[derive(Debug)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    /// Peers with an outstanding private history request, oldest first.
    pending_private: VecDeque<PeerId>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Create a store holding only the empty global room.
    #[must_use]
    pub fn new() -> Self {
        let mut conversations = HashMap::new();
        conversations.insert(ConversationId::Global, Conversation::new());
        Self {
            conversations,
            pending_private: VecDeque::new(),
        }
    }

    fn ensure(&mut self, conversation: &ConversationId) -> &mut Conversation {
        self.conversations
            .entry(conversation.clone())
            .or_insert_with(Conversation::new)
    }

    /// Create `conversation` if it does not exist yet.
    pub fn open(&mut self, conversation: &ConversationId) {
        self.ensure(conversation);
    }

    /// Append a live message unless it is already present.
    ///
    /// Returns `true` if the message was new.
    pub fn append_live(&mut self, conversation: &ConversationId, message: ChatMessage) -> bool {
        let conv = self.ensure(conversation);
        let buffered = matches!(conv.history, HistoryState::Pending { .. }).then(|| message.clone());
        if !conv.push(message) {
            tracing::debug!(%conversation, "duplicate message ignored");
            return false;
        }
        if let (HistoryState::Pending { buffer }, Some(message)) = (&mut conv.history, buffered) {
            buffer.push(message);
        }
        true
    }

    /// Replace the content of `conversation` with a history reply.
    ///
    /// The reply is deduplicated. If a request was outstanding, live
    /// messages that arrived meanwhile and are absent from the reply are
    /// re-appended after it in arrival order. Returns the resulting length.
    pub fn replace_history(
        &mut self,
        conversation: &ConversationId,
        messages: Vec<ChatMessage>,
    ) -> usize {
        if let Some(peer) = conversation.peer() {
            self.pending_private.retain(|pending| pending != peer);
        }

        let conv = self.ensure(conversation);
        let previous = std::mem::replace(&mut conv.history, HistoryState::Loaded);
        conv.messages.clear();
        conv.keys.clear();
        for message in messages {
            conv.push(message);
        }
        let reply_len = conv.messages.len();

        if let HistoryState::Pending { buffer } = previous {
            let before = conv.messages.len();
            for message in buffer {
                conv.push(message);
            }
            let restored = conv.messages.len() - before;
            if restored > 0 {
                tracing::debug!(%conversation, restored, "re-appended live messages after history");
            }
        }

        tracing::debug!(%conversation, reply_len, total = conv.messages.len(), "history applied");
        conv.messages.len()
    }

    /// Messages of `conversation` in arrival order; empty if it does not exist.
    #[must_use]
    pub fn get(&self, conversation: &ConversationId) -> &[ChatMessage] {
        self.conversations
            .get(conversation)
            .map(|conv| conv.messages.as_slice())
            .unwrap_or_default()
    }

    /// Whether `conversation` has been created.
    #[must_use]
    pub fn contains(&self, conversation: &ConversationId) -> bool {
        self.conversations.contains_key(conversation)
    }

    /// History fetch state of `conversation`.
    #[must_use]
    pub fn history_status(&self, conversation: &ConversationId) -> HistoryStatus {
        match self.conversations.get(conversation).map(|c| &c.history) {
            None | Some(HistoryState::NotRequested) => HistoryStatus::NotRequested,
            Some(HistoryState::Pending { .. }) => HistoryStatus::Pending,
            Some(HistoryState::Loaded) => HistoryStatus::Loaded,
        }
    }

    /// Record that history was requested for `conversation`.
    ///
    /// Live messages from now on are buffered until the reply lands. A
    /// repeated request keeps the existing buffer.
    pub fn begin_history_request(&mut self, conversation: &ConversationId) {
        if let Some(peer) = conversation.peer() {
            if !self.pending_private.contains(peer) {
                self.pending_private.push_back(peer.clone());
            }
        }
        let conv = self.ensure(conversation);
        if !matches!(conv.history, HistoryState::Pending { .. }) {
            conv.history = HistoryState::Pending { buffer: Vec::new() };
        }
    }

    /// Work out which private conversation a history reply belongs to.
    ///
    /// Tries, in order: the peer named in the reply, the other party of the
    /// first message, and the oldest outstanding private request.
    #[must_use]
    pub fn resolve_private_history(
        &self,
        reply: &PrivateHistory,
        local: &PeerId,
    ) -> Option<ConversationId> {
        reply
            .peer_id
            .clone()
            .or_else(|| {
                reply
                    .messages
                    .first()
                    .and_then(|m| m.other_party(local))
                    .cloned()
            })
            .or_else(|| self.pending_private.front().cloned())
            .map(ConversationId::Peer)
    }

    /// Ids of every conversation created so far.
    pub fn conversation_ids(&self) -> impl Iterator<Item = &ConversationId> {
        self.conversations.keys()
    }
}
