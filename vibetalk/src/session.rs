//! The logged-in chat session.
//!
//! [`ChatSession`] owns everything that lives between login and logout:
//! the identity, the transport handle, the chat state, the composer and the
//! event dispatcher. It applies inbound events and user actions, carries
//! out the resulting effects, and publishes [`SessionEvent`]s for the front
//! end. Transport failures never end the session; they become notices.

use std::sync::Arc;

use tokio::sync::mpsc;
use vibetalk_proto::event::{
    EventName, GlobalMessageOut, InboundEvent, OutboundEvent, PrivateMessageOut, RegisterSession,
};
use vibetalk_proto::message::{AUDIO_CAPTION, ConversationId, MessageKind, Timestamp};

use crate::composer::audio::{CaptureError, CaptureStream};
use crate::composer::{CaptureTicket, Composer, EncodedAudio, FinishedRecording};
use crate::dispatch::{Dispatcher, HandlerId};
use crate::identity::Identity;
use crate::state::{ChatState, Effect, Notice, SessionEvent};
use crate::transport::Transport;

/// Result of submitting the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The draft was blank; nothing happened.
    Empty,
    /// The message was handed to the transport.
    Sent,
    /// The transport refused the message; the draft was still cleared.
    Dropped,
}

/// One user session against the chat backend.
pub struct ChatSession<T: Transport> {
    identity: Identity,
    transport: Arc<T>,
    state: ChatState,
    composer: Composer,
    dispatcher: Dispatcher,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<T: Transport> ChatSession<T> {
    /// Create a session over a connected transport.
    ///
    /// Returns the session and a receiver for the [`SessionEvent`]s the
    /// front end should consume. Call [`start`](Self::start) to register
    /// with the backend.
    pub fn new(
        identity: Identity,
        transport: Arc<T>,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let session = Self {
            state: ChatState::new(identity.peer_id().clone()),
            identity,
            transport,
            composer: Composer::new(),
            dispatcher: Dispatcher::new(),
            event_tx,
        };
        (session, event_rx)
    }

    /// The local identity.
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The current chat state.
    pub const fn state(&self) -> &ChatState {
        &self.state
    }

    /// The composer.
    pub const fn composer(&self) -> &Composer {
        &self.composer
    }

    /// The transport handle.
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Register an observer for an inbound event name.
    ///
    /// Observers run after the event has been applied to the state.
    pub fn on<F>(&mut self, event: EventName, handler: F) -> HandlerId
    where
        F: FnMut(&InboundEvent) + Send + 'static,
    {
        self.dispatcher.on(event, handler)
    }

    /// Remove an observer.
    pub fn off(&mut self, id: HandlerId) -> bool {
        self.dispatcher.off(id)
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::warn!(err = %e, "session event dropped");
        }
    }

    /// Publish a notice to the front end.
    pub fn report(&self, notice: Notice) {
        self.publish(SessionEvent::Notice(notice));
    }

    /// Hand an event to the transport; failures become connectivity notices.
    fn emit(&self, event: &OutboundEvent) -> bool {
        match self.transport.send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(event = %event.name(), err = %e, "outbound event dropped");
                self.report(Notice::Connectivity(format!("{} not sent: {e}", event.name())));
                false
            }
        }
    }

    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    self.emit(&event);
                }
                Effect::Notify(event) => self.publish(event),
            }
        }
    }

    fn register_event(&self) -> OutboundEvent {
        OutboundEvent::RegisterSession(RegisterSession {
            session_id: self.identity.peer_id().clone(),
            display_name: self.identity.display_name().to_string(),
            avatar_ref: self.identity.avatar_ref().to_string(),
        })
    }

    /// Announce the session to the backend.
    ///
    /// The backend answers with presence, global history and unread
    /// counts; live global messages arriving first are kept.
    pub fn start(&mut self) {
        tracing::info!(session = %self.identity.session_id(), name = self.identity.display_name(), "registering session");
        self.state.begin_global_history();
        let register = self.register_event();
        self.emit(&register);
        self.publish(SessionEvent::ActiveChanged(ConversationId::Global));
    }

    /// Apply one inbound event, then run its observers.
    pub fn handle_inbound(&mut self, event: InboundEvent) {
        tracing::debug!(event = %event.name(), "applying inbound event");
        let effects = self.state.apply(event.clone());
        self.run(effects);
        self.dispatcher.dispatch(&event);
    }

    /// Switch the active conversation.
    pub fn activate(&mut self, target: ConversationId) {
        let effects = self.state.activate(target, Timestamp::now());
        self.run(effects);
    }

    /// Re-request history for the active conversation.
    ///
    /// Private conversations re-issue `request_private_history`; the
    /// global room re-registers, which makes the backend resend it.
    pub fn retry_history(&mut self) {
        match self.state.active().clone() {
            ConversationId::Peer(peer) => {
                let effects = self.state.retry_history(&peer);
                self.run(effects);
            }
            ConversationId::Global => {
                self.state.begin_global_history();
                let register = self.register_event();
                self.emit(&register);
            }
        }
    }

    /// Replace the draft.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.set_draft(text);
    }

    /// Append text (an emoji, say) to the draft.
    pub fn insert_text(&mut self, text: &str) {
        self.composer.insert_text(text);
    }

    fn outgoing(
        &self,
        target: &ConversationId,
        text: String,
        kind: MessageKind,
        audio_data: Option<String>,
    ) -> OutboundEvent {
        match target {
            ConversationId::Global => OutboundEvent::SendGlobalMessage(GlobalMessageOut {
                session_id: self.identity.peer_id().clone(),
                display_name: self.identity.display_name().to_string(),
                avatar_ref: self.identity.avatar_ref().to_string(),
                text,
                kind,
                audio_data,
            }),
            ConversationId::Peer(peer) => OutboundEvent::SendPrivateMessage(PrivateMessageOut {
                sender_id: self.identity.peer_id().clone(),
                receiver_id: peer.clone(),
                sender_display_name: self.identity.display_name().to_string(),
                sender_avatar_ref: self.identity.avatar_ref().to_string(),
                text,
                kind,
                audio_data,
            }),
        }
    }

    /// Send the draft to the active conversation.
    ///
    /// Blank drafts are left as they are. Otherwise the draft is cleared
    /// whether or not the transport accepted the message.
    pub fn submit_text(&mut self) -> Submission {
        let Some(text) = self.composer.take_submission() else {
            return Submission::Empty;
        };
        let event = self.outgoing(self.state.active(), text, MessageKind::Text, None);
        if self.emit(&event) {
            Submission::Sent
        } else {
            Submission::Dropped
        }
    }

    /// Start a capture for the active conversation.
    ///
    /// Returns the ticket to pass back to [`capture_ready`](Self::capture_ready)
    /// once the source has opened, or `None` if a capture already exists.
    pub fn begin_recording(&mut self) -> Option<CaptureTicket> {
        match self.composer.begin_capture(self.state.active().clone()) {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                tracing::debug!(err = %e, "capture start ignored");
                self.report(Notice::Capture(e.to_string()));
                None
            }
        }
    }

    /// Deliver the result of opening the audio source.
    pub fn capture_ready(
        &mut self,
        ticket: CaptureTicket,
        result: Result<CaptureStream, CaptureError>,
    ) {
        match self.composer.capture_ready(ticket, result) {
            Ok(true) => {
                let target = self
                    .composer
                    .capture_target()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.report(Notice::Info(format!("recording for {target}")));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(err = %e, "audio capture failed");
                self.report(Notice::Capture(e.to_string()));
            }
        }
    }

    /// Whether a recording has a live chunk channel.
    pub const fn is_streaming(&self) -> bool {
        self.composer.is_streaming()
    }

    /// Wait for the next recorded chunk. See [`Composer::next_chunk`].
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.composer.next_chunk().await
    }

    /// Append a recorded chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.composer.push_chunk(chunk);
    }

    /// Stop recording and return what needs encoding, if anything.
    pub fn stop_recording(&mut self) -> Option<FinishedRecording> {
        match self.composer.finish_capture() {
            Ok(Some(recording)) => Some(recording),
            Ok(None) => {
                self.report(Notice::Info("nothing recorded".into()));
                None
            }
            Err(e) => {
                self.report(Notice::Capture(e.to_string()));
                None
            }
        }
    }

    /// Abandon the current capture without sending.
    pub fn cancel_recording(&mut self) -> bool {
        let cancelled = self.composer.cancel_capture();
        if cancelled {
            self.report(Notice::Info("recording cancelled".into()));
        }
        cancelled
    }

    /// Send an encoded recording to the conversation it was made for.
    pub fn send_audio(&mut self, audio: EncodedAudio) -> bool {
        let event = self.outgoing(
            &audio.target,
            AUDIO_CAPTION.to_string(),
            MessageKind::Audio,
            Some(audio.data_uri),
        );
        self.emit(&event)
    }

    /// Report a failure to encode a recording.
    pub fn audio_failed(&self, err: &CaptureError) {
        tracing::warn!(err = %err, "audio encoding failed");
        self.report(Notice::Capture(err.to_string()));
    }

    /// Report that the connection dropped.
    pub fn connection_lost(&self, err: &crate::transport::TransportError) {
        tracing::warn!(err = %err, "connection to backend lost");
        self.report(Notice::Connectivity(format!("connection lost: {err}")));
    }

    /// End the session: stop any capture and release the connection.
    pub fn logout(&mut self) {
        self.composer.cancel_capture();
        self.transport.disconnect();
        tracing::info!(session = %self.identity.session_id(), "session ended");
    }
}
