//! `VibeTalk`: terminal client library for a real-time chat backend.
//!
//! A session registers with the backend over a WebSocket, tracks who is
//! online, keeps the global room and private conversations in order, counts
//! unread messages per peer, and sends text and recorded audio.

pub mod app;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod identity;
pub mod net;
pub mod notify;
pub mod presence;
pub mod session;
pub mod state;
pub mod transport;
