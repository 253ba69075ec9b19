//! Shared protocol definitions for the `VibeTalk` wire format.

pub mod codec;
pub mod data_uri;
pub mod event;
pub mod message;
pub mod presence;
