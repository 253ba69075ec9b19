//! Presence types: the users currently connected to the backend.

use serde::de;
use serde::{Deserialize, Deserializer};

use crate::message::{PeerId, WireObject, WireScalar, non_empty_id};

/// A connected user, as listed in the latest presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUser {
    /// The peer's session id.
    pub peer_id: PeerId,
    /// Name chosen at login.
    pub display_name: String,
    /// Preset avatar name or image data URI.
    pub avatar_ref: String,
}

/// A presence entry exactly as the backend sent it.
#[derive(Debug, Clone, Default)]
pub struct WirePeer {
    /// Session id of the peer, string or number.
    pub peer_id: Option<WireScalar>,
    /// Display name.
    pub display_name: Option<String>,
    /// Avatar reference.
    pub avatar_ref: Option<String>,
}

impl<'de> Deserialize<'de> for WirePeer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut object = WireObject::deserialize(deserializer)?;
        Ok(Self {
            peer_id: object
                .take(&["peerId", "userId", "user_id", "peer_id"])
                .map_err(de::Error::custom)?,
            display_name: object
                .take(&["displayName", "username"])
                .map_err(de::Error::custom)?,
            avatar_ref: object
                .take(&["avatarRef", "avatar"])
                .map_err(de::Error::custom)?,
        })
    }
}

impl WirePeer {
    /// Validate into a [`PeerUser`]; entries without a peer id are unusable.
    #[must_use]
    pub fn into_peer(self) -> Option<PeerUser> {
        Some(PeerUser {
            peer_id: non_empty_id(self.peer_id)?,
            display_name: self.display_name.unwrap_or_default(),
            avatar_ref: self.avatar_ref.unwrap_or_default(),
        })
    }
}
