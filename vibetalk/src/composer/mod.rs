//! Outgoing message composition: the text draft and audio capture.
//!
//! The composer owns the draft and the single capture slot. It never talks
//! to the transport itself; the session turns what it produces into
//! outbound events.
//!
//! Capture goes through three states: idle, acquiring (waiting for
//! [`audio::AudioSource::open`]), and recording. Only one capture may exist
//! at a time, and the recording is addressed to the conversation that was
//! active when it started.

pub mod audio;

use tokio::sync::mpsc;
use vibetalk_proto::data_uri;
use vibetalk_proto::message::ConversationId;

use self::audio::{CaptureError, CaptureStream};

/// Identifies one capture attempt, so a late acquisition result for an
/// abandoned attempt can be recognized and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureTicket(u64);

/// A stopped recording, ready to be encoded.
#[derive(Debug)]
pub struct FinishedRecording {
    /// Conversation the recording is addressed to.
    pub target: ConversationId,
    /// MIME type of `bytes`.
    pub mime_type: String,
    /// All chunks concatenated in capture order.
    pub bytes: Vec<u8>,
}

impl FinishedRecording {
    /// Encode into a data URI. CPU-bound; run off the event loop.
    #[must_use]
    pub fn encode(self) -> EncodedAudio {
        EncodedAudio {
            data_uri: data_uri::encode(&self.mime_type, &self.bytes),
            target: self.target,
        }
    }
}

/// An encoded recording, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Conversation the recording is addressed to.
    pub target: ConversationId,
    /// `data:<mime>;base64,<...>`.
    pub data_uri: String,
}

#[derive(Debug)]
struct Recording {
    target: ConversationId,
    mime_type: String,
    bytes: Vec<u8>,
    /// `None` once the source has ended.
    chunks: Option<mpsc::Receiver<Vec<u8>>>,
}

#[derive(Debug, Default)]
enum CaptureState {
    #[default]
    Idle,
    Acquiring {
        ticket: CaptureTicket,
        target: ConversationId,
    },
    Recording(Recording),
}

/// Draft text plus the capture slot.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
    capture: CaptureState,
    next_ticket: u64,
}

impl Composer {
    /// Create an empty composer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current draft.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the draft.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Append text (e.g. a picked emoji) to the end of the draft.
    pub fn insert_text(&mut self, text: &str) {
        self.draft.push_str(text);
    }

    /// Take the draft for sending.
    ///
    /// Returns the trimmed text and clears the draft, or `None` (leaving
    /// the draft untouched) when it is only whitespace.
    pub fn take_submission(&mut self) -> Option<String> {
        let text = self.draft.trim();
        if text.is_empty() {
            return None;
        }
        let text = text.to_string();
        self.draft.clear();
        Some(text)
    }

    /// Whether a capture is acquiring or recording.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        !matches!(self.capture, CaptureState::Idle)
    }

    /// Whether a capture is recording.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.capture, CaptureState::Recording(_))
    }

    /// Whether a recording still has a live chunk channel to read.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(
            self.capture,
            CaptureState::Recording(Recording {
                chunks: Some(_),
                ..
            })
        )
    }

    /// Conversation the current capture is addressed to.
    #[must_use]
    pub const fn capture_target(&self) -> Option<&ConversationId> {
        match &self.capture {
            CaptureState::Idle => None,
            CaptureState::Acquiring { target, .. } | CaptureState::Recording(Recording { target, .. }) => {
                Some(target)
            }
        }
    }

    /// Start acquiring a capture for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyActive`] if a capture already exists;
    /// the running one is left alone.
    pub fn begin_capture(&mut self, target: ConversationId) -> Result<CaptureTicket, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::AlreadyActive);
        }
        self.next_ticket += 1;
        let ticket = CaptureTicket(self.next_ticket);
        self.capture = CaptureState::Acquiring { ticket, target };
        Ok(ticket)
    }

    /// Deliver the result of opening the source for `ticket`.
    ///
    /// Returns `Ok(true)` once recording, or `Ok(false)` if the ticket no
    /// longer matches (the attempt was cancelled) and the stream was dropped.
    ///
    /// # Errors
    ///
    /// Passes through the acquisition error; the composer returns to idle
    /// and the draft is untouched.
    pub fn capture_ready(
        &mut self,
        ticket: CaptureTicket,
        result: Result<CaptureStream, CaptureError>,
    ) -> Result<bool, CaptureError> {
        let target = match &self.capture {
            CaptureState::Acquiring { ticket: current, target } if *current == ticket => target.clone(),
            _ => {
                tracing::debug!(?ticket, "ignoring result for abandoned capture");
                return Ok(false);
            }
        };

        match result {
            Ok(stream) => {
                self.capture = CaptureState::Recording(Recording {
                    target,
                    mime_type: stream.mime_type,
                    bytes: Vec::new(),
                    chunks: Some(stream.chunks),
                });
                Ok(true)
            }
            Err(e) => {
                self.capture = CaptureState::Idle;
                Err(e)
            }
        }
    }

    /// Wait for the next chunk of the active recording.
    ///
    /// Returns `None` when there is no live chunk channel; a channel that
    /// just ended is marked exhausted so this is not polled again.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let CaptureState::Recording(recording) = &mut self.capture else {
            return None;
        };
        let rx = recording.chunks.as_mut()?;
        let chunk = rx.recv().await;
        if chunk.is_none() {
            recording.chunks = None;
        }
        chunk
    }

    /// Append a chunk to the active recording. Ignored when not recording.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if let CaptureState::Recording(recording) = &mut self.capture {
            recording.bytes.extend_from_slice(chunk);
        }
    }

    /// Stop the capture and collect what was recorded.
    ///
    /// Chunks already queued are drained first. Stopping while still
    /// acquiring abandons the attempt. Returns `Ok(None)` when nothing was
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NotActive`] when no capture exists.
    pub fn finish_capture(&mut self) -> Result<Option<FinishedRecording>, CaptureError> {
        match std::mem::take(&mut self.capture) {
            CaptureState::Idle => Err(CaptureError::NotActive),
            CaptureState::Acquiring { .. } => Ok(None),
            CaptureState::Recording(mut recording) => {
                if let Some(mut rx) = recording.chunks.take() {
                    rx.close();
                    while let Ok(chunk) = rx.try_recv() {
                        recording.bytes.extend_from_slice(&chunk);
                    }
                }
                if recording.bytes.is_empty() {
                    return Ok(None);
                }
                Ok(Some(FinishedRecording {
                    target: recording.target,
                    mime_type: recording.mime_type,
                    bytes: recording.bytes,
                }))
            }
        }
    }

    /// Abandon the capture. Dropping the chunk receiver stops the source.
    ///
    /// Returns `true` if a capture was running.
    pub fn cancel_capture(&mut self) -> bool {
        !matches!(std::mem::take(&mut self.capture), CaptureState::Idle)
    }
}
