//! Client-side chat state and its transitions.
//!
//! [`ChatState`] combines presence, message history, unread counters and
//! the active-conversation pointer. Every inbound event and every local
//! activation is one pure transition that returns the [`Effect`]s the
//! session must carry out, so the whole state machine runs without a
//! connection in tests.

use std::collections::BTreeMap;

use vibetalk_proto::event::{InboundEvent, OutboundEvent, PeerRequest, PrivateHistory};
use vibetalk_proto::message::{ChatMessage, ConversationId, PeerId, Timestamp};
use vibetalk_proto::presence::PeerUser;

use crate::conversation::{ConversationStore, HistoryStatus};
use crate::notify::{NotificationTracker, PushOutcome};
use crate::presence::PresenceTracker;

/// Non-fatal problems reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The backend could not be reached; the action was dropped.
    Connectivity(String),
    /// Audio capture or encoding failed.
    Capture(String),
    /// Informational status (recording started, nothing to send, ...).
    Info(String),
}

/// Changes the front end should reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The online-peer list changed.
    PresenceChanged(Vec<PeerUser>),
    /// A live message was added to a conversation.
    MessageAppended {
        /// Where it was added.
        conversation: ConversationId,
        /// The message.
        message: ChatMessage,
    },
    /// A conversation's content was replaced by a history reply.
    HistoryReplaced {
        /// Which conversation.
        conversation: ConversationId,
        /// Number of messages it now holds.
        count: usize,
    },
    /// Unread counters changed; carries the full map.
    UnreadChanged(BTreeMap<PeerId, u32>),
    /// The active conversation changed.
    ActiveChanged(ConversationId),
    /// Something the user should know about.
    Notice(Notice),
}

/// Work produced by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send an event to the backend.
    Emit(OutboundEvent),
    /// Publish an event to the front end.
    Notify(SessionEvent),
}

/// The complete client-side view of the chat.
#[derive(Debug)]
pub struct ChatState {
    local: PeerId,
    presence: PresenceTracker,
    store: ConversationStore,
    unread: NotificationTracker,
    active: ConversationId,
}

impl ChatState {
    /// Create the initial state for session `local`, with global active.
    #[must_use]
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            presence: PresenceTracker::new(),
            store: ConversationStore::new(),
            unread: NotificationTracker::new(),
            active: ConversationId::Global,
        }
    }

    /// The local session id.
    #[must_use]
    pub const fn local(&self) -> &PeerId {
        &self.local
    }

    /// Online peers.
    #[must_use]
    pub const fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Message history.
    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Unread counters.
    #[must_use]
    pub const fn unread(&self) -> &NotificationTracker {
        &self.unread
    }

    /// The active conversation.
    #[must_use]
    pub const fn active(&self) -> &ConversationId {
        &self.active
    }

    /// Messages of the active conversation.
    #[must_use]
    pub fn active_messages(&self) -> &[ChatMessage] {
        self.store.get(&self.active)
    }

    fn active_peer(&self) -> Option<&PeerId> {
        self.active.peer()
    }

    fn peer_request(&self, peer: &PeerId) -> PeerRequest {
        PeerRequest {
            requester_id: self.local.clone(),
            peer_id: peer.clone(),
        }
    }

    fn unread_changed(&self) -> Effect {
        Effect::Notify(SessionEvent::UnreadChanged(self.unread.counts().clone()))
    }

    /// Expect the global history that the backend sends after registration.
    pub fn begin_global_history(&mut self) {
        self.store.begin_history_request(&ConversationId::Global);
    }

    /// Apply one inbound event.
    pub fn apply(&mut self, event: InboundEvent) -> Vec<Effect> {
        match event {
            InboundEvent::PresenceSnapshot(peers) => {
                if self.presence.replace(peers, &self.local) {
                    vec![Effect::Notify(SessionEvent::PresenceChanged(
                        self.presence.peers().to_vec(),
                    ))]
                } else {
                    Vec::new()
                }
            }
            InboundEvent::GlobalHistory(messages) => {
                self.replace_history(ConversationId::Global, messages)
            }
            InboundEvent::GlobalMessage(message) => {
                self.append(ConversationId::Global, message).unwrap_or_default()
            }
            InboundEvent::PrivateMessage(message) => self.apply_private_message(message),
            InboundEvent::PrivateHistory(reply) => self.apply_private_history(reply),
            InboundEvent::UnreadSnapshot(counts) => {
                let active = self.active.peer().cloned();
                let outcome = self.unread.apply_snapshot(counts, active.as_ref());
                let mut effects = Vec::new();
                if outcome.changed {
                    effects.push(self.unread_changed());
                }
                if let (true, Some(peer)) = (outcome.active_had_unread, active) {
                    effects.push(Effect::Emit(OutboundEvent::MarkPrivateRead(
                        self.peer_request(&peer),
                    )));
                }
                effects
            }
            InboundEvent::UnreadUpdate(update) => {
                match self.unread.apply_update(&update, self.active.peer()) {
                    PushOutcome::Applied => vec![self.unread_changed()],
                    PushOutcome::SuppressedActive { had_unread: true } => {
                        vec![Effect::Emit(OutboundEvent::MarkPrivateRead(
                            self.peer_request(&update.peer_id),
                        ))]
                    }
                    PushOutcome::SuppressedActive { had_unread: false }
                    | PushOutcome::Unchanged
                    | PushOutcome::Stale => Vec::new(),
                }
            }
            InboundEvent::UnreadCleared { peer_id } => {
                if self.unread.apply_cleared(&peer_id) {
                    vec![self.unread_changed()]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn append(&mut self, conversation: ConversationId, message: ChatMessage) -> Option<Vec<Effect>> {
        if !self.store.append_live(&conversation, message.clone()) {
            return None;
        }
        Some(vec![Effect::Notify(SessionEvent::MessageAppended {
            conversation,
            message,
        })])
    }

    fn replace_history(
        &mut self,
        conversation: ConversationId,
        messages: Vec<ChatMessage>,
    ) -> Vec<Effect> {
        let count = self.store.replace_history(&conversation, messages);
        vec![Effect::Notify(SessionEvent::HistoryReplaced {
            conversation,
            count,
        })]
    }

    fn apply_private_message(&mut self, message: ChatMessage) -> Vec<Effect> {
        let Some(conversation) = message.private_conversation(&self.local) else {
            tracing::warn!(sender = %message.sender_id, "private message without a resolvable conversation, discarding");
            return Vec::new();
        };
        let from_peer = message.sender_id != self.local;
        let Some(mut effects) = self.append(conversation.clone(), message) else {
            return Vec::new();
        };

        if let (true, Some(peer)) = (from_peer, conversation.peer()) {
            let active = self.active_peer().cloned();
            if self.unread.record_message(peer, active.as_ref()) {
                effects.push(self.unread_changed());
            }
        }
        effects
    }

    fn apply_private_history(&mut self, reply: PrivateHistory) -> Vec<Effect> {
        let Some(conversation) = self.store.resolve_private_history(&reply, &self.local) else {
            tracing::warn!(
                messages = reply.messages.len(),
                "private history reply for unknown conversation, discarding"
            );
            return Vec::new();
        };
        self.replace_history(conversation, reply.messages)
    }

    /// Make `target` the active conversation.
    ///
    /// Opening a peer conversation for the first time requests its
    /// history. Activating a peer clears its unread count locally and
    /// tells the backend. Re-activating the current conversation does
    /// nothing.
    pub fn activate(&mut self, target: ConversationId, now: Timestamp) -> Vec<Effect> {
        if target == self.active {
            return Vec::new();
        }
        self.active = target.clone();
        let mut effects = vec![Effect::Notify(SessionEvent::ActiveChanged(target.clone()))];

        let ConversationId::Peer(peer) = &target else {
            return effects;
        };

        self.store.open(&target);
        if self.store.history_status(&target) == HistoryStatus::NotRequested {
            self.store.begin_history_request(&target);
            effects.push(Effect::Emit(OutboundEvent::RequestPrivateHistory(
                self.peer_request(peer),
            )));
        }

        let had_unread = self.unread.count(peer) > 0;
        self.unread.clear_local(peer, now);
        if had_unread {
            effects.push(self.unread_changed());
        }
        effects.push(Effect::Emit(OutboundEvent::MarkPrivateRead(
            self.peer_request(peer),
        )));
        effects
    }

    /// Re-request the history of a private conversation.
    pub fn retry_history(&mut self, peer: &PeerId) -> Vec<Effect> {
        let conversation = ConversationId::Peer(peer.clone());
        self.store.begin_history_request(&conversation);
        vec![Effect::Emit(OutboundEvent::RequestPrivateHistory(
            self.peer_request(peer),
        ))]
    }
}
