//! Line-mode front end: input parsing and rendering of session events.
//!
//! [`App`] mirrors just enough of the session (online peers, unread
//! counters, active conversation) to label output and answer `/who` and
//! `/unread` without a round trip. Everything authoritative stays in the
//! session task.

use std::collections::BTreeMap;
use std::path::PathBuf;

use vibetalk_proto::data_uri;
use vibetalk_proto::message::{ChatMessage, ConversationId, MessageBody, PeerId};
use vibetalk_proto::presence::PeerUser;

use crate::net::NetCommand;
use crate::state::{Notice, SessionEvent};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text to send to the active conversation.
    Send(String),
    /// `/global`
    Global,
    /// `/chat <peer-id|name>`
    Chat(String),
    /// `/who`
    Who,
    /// `/unread`
    Unread,
    /// `/record <file>`
    Record(PathBuf),
    /// `/stop`
    Stop,
    /// `/cancel`
    Cancel,
    /// `/retry`
    Retry,
    /// `/emoji <text>`
    Emoji(String),
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// A command that is unknown or missing its argument.
    Invalid(String),
    /// A blank line.
    Empty,
}

impl Input {
    /// Parse a line typed by the user.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));

        match (name, arg.is_empty()) {
            ("global", _) => Self::Global,
            ("who", _) => Self::Who,
            ("unread", _) => Self::Unread,
            ("stop", _) => Self::Stop,
            ("cancel", _) => Self::Cancel,
            ("retry", _) => Self::Retry,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            ("chat", false) => Self::Chat(arg.to_string()),
            ("record", false) => Self::Record(PathBuf::from(arg)),
            ("emoji", false) => Self::Emoji(arg.to_string()),
            ("chat" | "record" | "emoji", true) => Self::Invalid(format!("/{name} needs an argument")),
            _ => Self::Invalid(format!("unknown command /{name} (try /help)")),
        }
    }

    /// The session command this input maps to, if any.
    #[must_use]
    pub fn into_command(self) -> Option<NetCommand> {
        match self {
            Self::Send(text) => Some(NetCommand::SendText { text }),
            Self::Global => Some(NetCommand::Activate(ConversationId::Global)),
            Self::Chat(query) => Some(NetCommand::OpenChat { query }),
            Self::Record(path) => Some(NetCommand::StartRecording { path }),
            Self::Stop => Some(NetCommand::StopRecording),
            Self::Cancel => Some(NetCommand::CancelRecording),
            Self::Retry => Some(NetCommand::RetryHistory),
            Self::Emoji(text) => Some(NetCommand::InsertText { text }),
            Self::Quit => Some(NetCommand::Shutdown),
            Self::Who | Self::Unread | Self::Help | Self::Invalid(_) | Self::Empty => None,
        }
    }
}

/// Help text printed for `/help`.
pub const HELP: &str = "\
commands:
  <text>              send to the active conversation
  /global             switch to the global room
  /chat <id|name>     open a private conversation
  /who                list online users
  /unread             show unread counts
  /record <file>      record an audio message from a file
  /stop               stop recording and send
  /cancel             discard the recording
  /retry              re-request history for this conversation
  /emoji <text>       add text to the draft without sending
  /quit               log out";

/// What to print after applying a session event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// Lines to print now.
    pub lines: Vec<String>,
    /// Conversation whose transcript should be fetched and printed.
    pub refresh: Option<ConversationId>,
}

/// Front-end view state.
#[derive(Debug)]
pub struct App {
    local: PeerId,
    peers: Vec<PeerUser>,
    unread: BTreeMap<PeerId, u32>,
    active: ConversationId,
    timestamp_format: String,
    /// Set once the user asked to leave.
    pub should_quit: bool,
}

impl App {
    /// Create the view for `local`, formatting times with `timestamp_format`.
    #[must_use]
    pub fn new(local: PeerId, timestamp_format: impl Into<String>) -> Self {
        Self {
            local,
            peers: Vec::new(),
            unread: BTreeMap::new(),
            active: ConversationId::Global,
            timestamp_format: timestamp_format.into(),
            should_quit: false,
        }
    }

    /// The conversation being viewed.
    #[must_use]
    pub const fn active(&self) -> &ConversationId {
        &self.active
    }

    /// Reflect a session event and say what to print.
    pub fn apply(&mut self, event: &SessionEvent) -> Output {
        let mut out = Output::default();
        match event {
            SessionEvent::PresenceChanged(peers) => {
                self.peers.clone_from(peers);
                out.lines.push(format!("* {} online", self.peers.len() + 1));
            }
            SessionEvent::MessageAppended {
                conversation,
                message,
            } => {
                if *conversation == self.active {
                    out.lines.push(self.format_message(message));
                } else if message.sender_id != self.local {
                    out.lines.push(format!(
                        "* new message in {} from {}",
                        self.label(conversation),
                        message.sender_name
                    ));
                }
            }
            SessionEvent::HistoryReplaced { conversation, .. } => {
                if *conversation == self.active {
                    out.refresh = Some(conversation.clone());
                }
            }
            SessionEvent::UnreadChanged(counts) => {
                self.unread.clone_from(counts);
            }
            SessionEvent::ActiveChanged(conversation) => {
                self.active = conversation.clone();
                out.lines.push(format!("== {} ==", self.label(conversation)));
                out.refresh = Some(conversation.clone());
            }
            SessionEvent::Notice(notice) => out.lines.push(match notice {
                Notice::Connectivity(text) => format!("! network: {text}"),
                Notice::Capture(text) => format!("! audio: {text}"),
                Notice::Info(text) => format!("* {text}"),
            }),
        }
        out
    }

    /// Display label for a conversation.
    #[must_use]
    pub fn label(&self, conversation: &ConversationId) -> String {
        match conversation {
            ConversationId::Global => "#global".to_string(),
            ConversationId::Peer(peer) => {
                let name = self
                    .peers
                    .iter()
                    .find(|user| user.peer_id == *peer)
                    .map_or(peer.as_str(), |user| user.display_name.as_str());
                format!("@{name}")
            }
        }
    }

    /// Render one message as `[time] name: text`.
    #[must_use]
    pub fn format_message(&self, message: &ChatMessage) -> String {
        let time = message.timestamp.to_datetime().map_or_else(
            || "--:--".to_string(),
            |dt| {
                dt.with_timezone(&chrono::Local)
                    .format(&self.timestamp_format)
                    .to_string()
            },
        );
        let name = if message.sender_id == self.local {
            "you"
        } else {
            message.sender_name.as_str()
        };
        let body = match &message.body {
            MessageBody::Text(text) => text.clone(),
            MessageBody::Audio { data_uri, caption } => {
                let caption = caption.as_deref().unwrap_or(vibetalk_proto::message::AUDIO_CAPTION);
                match data_uri::decode(data_uri) {
                    Ok((mime, bytes)) => format!("{caption} ({mime}, {} bytes)", bytes.len()),
                    Err(_) => format!("{caption} (unplayable)"),
                }
            }
        };
        format!("[{time}] {name}: {body}")
    }

    /// Render a whole transcript.
    #[must_use]
    pub fn format_transcript(&self, messages: &[ChatMessage]) -> Vec<String> {
        if messages.is_empty() {
            return vec!["(no messages yet)".to_string()];
        }
        messages.iter().map(|m| self.format_message(m)).collect()
    }

    /// Lines for `/who`.
    #[must_use]
    pub fn who_lines(&self) -> Vec<String> {
        if self.peers.is_empty() {
            return vec!["nobody else is online".to_string()];
        }
        self.peers
            .iter()
            .map(|user| format!("  {} ({})", user.display_name, user.peer_id))
            .collect()
    }

    /// Lines for `/unread`.
    #[must_use]
    pub fn unread_lines(&self) -> Vec<String> {
        if self.unread.is_empty() {
            return vec!["no unread messages".to_string()];
        }
        self.unread
            .iter()
            .map(|(peer, count)| {
                format!("  {}: {count}", self.label(&ConversationId::Peer(peer.clone())))
            })
            .collect()
    }
}
