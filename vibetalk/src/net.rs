//! Networking coordinator between the front end and the chat session.
//!
//! The session runs on one background tokio task that owns it exclusively.
//! The front end sends [`NetCommand`]s and drains [`SessionEvent`]s; every
//! inbound event, command, capture result and encoded recording is handled
//! to completion before the next one, so there is no shared mutable state.
//!
//! # Architecture
//!
//! ```text
//! front end  ←── SessionEvent ───  session task  ←── frames ───  backend
//!            ─── NetCommand ───→                 ─── frames ──→
//!                                       │  ▲
//!                       audio source ───┘  └─── spawn_blocking(encode)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use vibetalk_proto::message::{ChatMessage, ConversationId};

use crate::composer::audio::{AudioSource, CaptureError, CaptureStream, DEFAULT_CHUNK_SIZE, FileAudioSource};
use crate::composer::{CaptureTicket, EncodedAudio};
use crate::identity::Identity;
use crate::session::ChatSession;
use crate::state::{Notice, SessionEvent};
use crate::transport::ws::{DEFAULT_CONNECT_TIMEOUT, WsTransport};
use crate::transport::{Transport, TransportError};

/// Commands sent from the front end to the session task.
#[derive(Debug)]
pub enum NetCommand {
    /// Append `text` to the draft and send it to the active conversation.
    SendText {
        /// The text typed by the user.
        text: String,
    },
    /// Append text (an emoji) to the draft without sending.
    InsertText {
        /// Text to append.
        text: String,
    },
    /// Switch the active conversation.
    Activate(ConversationId),
    /// Open the private conversation with the online peer matching `query`
    /// (an id, or a display name compared case-insensitively).
    OpenChat {
        /// Peer id or display name.
        query: String,
    },
    /// Start recording from an audio file for the active conversation.
    StartRecording {
        /// File streamed as the capture source.
        path: PathBuf,
    },
    /// Stop recording and send what was captured.
    StopRecording,
    /// Abandon the recording.
    CancelRecording,
    /// Re-request history for the active conversation.
    RetryHistory,
    /// Fetch the messages of a conversation.
    Transcript {
        /// Which conversation.
        conversation: ConversationId,
        /// Receives the messages in display order.
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    /// Log out and stop the session task.
    Shutdown,
}

/// Configuration for the networking layer.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// WebSocket URL of the backend (e.g., `ws://127.0.0.1:3001/socket`).
    pub endpoint: String,
    /// How long the WebSocket handshake may take.
    pub connect_timeout: Duration,
    /// Channel capacity for commands and inbound frames.
    pub channel_capacity: usize,
    /// Buffer size for the [`SessionEvent`] channel.
    pub event_buffer: usize,
    /// Chunk size used when streaming audio files.
    pub chunk_size: usize,
}

/// Default channel capacity for commands and inbound frames.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default capacity of the session event channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

impl NetConfig {
    /// Creates a `NetConfig` with default timeouts and capacities.
    #[must_use]
    pub const fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Connect to the backend, register `identity`, and spawn the session task.
///
/// # Errors
///
/// Returns the [`TransportError`] if the WebSocket connection cannot be
/// established; nothing is spawned in that case.
pub async fn spawn_net(
    config: NetConfig,
    identity: Identity,
) -> Result<(mpsc::Sender<NetCommand>, mpsc::Receiver<SessionEvent>), TransportError> {
    let transport = WsTransport::connect(
        &config.endpoint,
        config.connect_timeout,
        config.channel_capacity,
    )
    .await?;

    let (mut session, event_rx) = ChatSession::new(identity, Arc::new(transport), config.event_buffer);
    session.start();
    let cmd_tx = spawn_session(session, &config);
    Ok((cmd_tx, event_rx))
}

/// Spawn the task driving an already-started session over any transport.
pub fn spawn_session<T: Transport + 'static>(
    session: ChatSession<T>,
    config: &NetConfig,
) -> mpsc::Sender<NetCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity.max(1));
    let chunk_size = config.chunk_size;
    tokio::spawn(async move {
        run_session(session, cmd_rx, chunk_size).await;
    });
    cmd_tx
}

type CaptureResult = (CaptureTicket, Result<CaptureStream, CaptureError>);

enum Step {
    Inbound(Result<vibetalk_proto::event::InboundEvent, TransportError>),
    Command(Option<NetCommand>),
    CaptureReady(CaptureResult),
    Chunk(Option<Vec<u8>>),
    Encoded(Result<EncodedAudio, CaptureError>),
}

/// Drive `session` until shutdown.
///
/// Losing the connection does not end the loop: the session keeps serving
/// commands (sends fail with notices) until the front end shuts it down or
/// drops the command sender.
pub async fn run_session<T: Transport + 'static>(
    mut session: ChatSession<T>,
    mut cmd_rx: mpsc::Receiver<NetCommand>,
    chunk_size: usize,
) {
    let transport = Arc::clone(session.transport());
    let (ready_tx, mut ready_rx) = mpsc::channel::<CaptureResult>(4);
    let (encoded_tx, mut encoded_rx) = mpsc::channel::<Result<EncodedAudio, CaptureError>>(4);
    let mut online = true;

    loop {
        let step = tokio::select! {
            inbound = transport.recv(), if online => Step::Inbound(inbound),
            cmd = cmd_rx.recv() => Step::Command(cmd),
            Some(ready) = ready_rx.recv() => Step::CaptureReady(ready),
            chunk = session.next_chunk(), if session.is_streaming() => Step::Chunk(chunk),
            Some(encoded) = encoded_rx.recv() => Step::Encoded(encoded),
        };

        match step {
            Step::Inbound(Ok(event)) => session.handle_inbound(event),
            Step::Inbound(Err(e)) => {
                online = false;
                session.connection_lost(&e);
            }
            Step::Command(None | Some(NetCommand::Shutdown)) => {
                tracing::info!("session task shutting down");
                session.logout();
                break;
            }
            Step::Command(Some(cmd)) => {
                handle_command(&mut session, cmd, chunk_size, &ready_tx, &encoded_tx);
            }
            Step::CaptureReady((ticket, result)) => session.capture_ready(ticket, result),
            Step::Chunk(Some(chunk)) => session.push_chunk(&chunk),
            Step::Chunk(None) => tracing::debug!("audio source finished"),
            Step::Encoded(Ok(audio)) => {
                session.send_audio(audio);
            }
            Step::Encoded(Err(e)) => session.audio_failed(&e),
        }
    }
}

fn handle_command<T: Transport>(
    session: &mut ChatSession<T>,
    cmd: NetCommand,
    chunk_size: usize,
    ready_tx: &mpsc::Sender<CaptureResult>,
    encoded_tx: &mpsc::Sender<Result<EncodedAudio, CaptureError>>,
) {
    match cmd {
        NetCommand::SendText { text } => {
            session.insert_text(&text);
            session.submit_text();
        }
        NetCommand::InsertText { text } => session.insert_text(&text),
        NetCommand::Activate(target) => session.activate(target),
        NetCommand::OpenChat { query } => {
            let peer = session
                .state()
                .presence()
                .find(&query)
                .map(|user| user.peer_id.clone());
            match peer {
                Some(peer) => session.activate(ConversationId::Peer(peer)),
                None => session.report(Notice::Info(format!("no online user matches {query:?}"))),
            }
        }
        NetCommand::StartRecording { path } => {
            if let Some(ticket) = session.begin_recording() {
                spawn_capture(FileAudioSource::new(path, chunk_size), ticket, ready_tx.clone());
            }
        }
        NetCommand::StopRecording => {
            if let Some(recording) = session.stop_recording() {
                let tx = encoded_tx.clone();
                tokio::spawn(async move {
                    let encoded = tokio::task::spawn_blocking(move || recording.encode())
                        .await
                        .map_err(|e| CaptureError::Encoding(e.to_string()));
                    let _ = tx.send(encoded).await;
                });
            }
        }
        NetCommand::CancelRecording => {
            session.cancel_recording();
        }
        NetCommand::RetryHistory => session.retry_history(),
        NetCommand::Transcript {
            conversation,
            reply,
        } => {
            let _ = reply.send(session.state().store().get(&conversation).to_vec());
        }
        NetCommand::Shutdown => {}
    }
}

/// Open `source` off the session task and report back with `ticket`.
fn spawn_capture<S: AudioSource + 'static>(
    source: S,
    ticket: CaptureTicket,
    ready_tx: mpsc::Sender<CaptureResult>,
) {
    tokio::spawn(async move {
        let result = source.open().await;
        if ready_tx.send((ticket, result)).await.is_err() {
            tracing::debug!(?ticket, "session gone before capture opened");
        }
    });
}
