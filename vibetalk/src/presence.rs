//! Online-peer tracking from full presence snapshots.

use std::collections::HashSet;

use vibetalk_proto::message::PeerId;
use vibetalk_proto::presence::PeerUser;

/// The set of other users currently connected.
///
/// Only full snapshots are applied; there are no incremental joins or
/// leaves. The local session is never listed.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    peers: Vec<PeerUser>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole peer list with `snapshot`.
    ///
    /// Entries for `local` are filtered out; a repeated peer id keeps its
    /// first occurrence. Returns `true` if the visible list changed.
    pub fn replace(&mut self, snapshot: Vec<PeerUser>, local: &PeerId) -> bool {
        let mut seen = HashSet::new();
        let peers: Vec<PeerUser> = snapshot
            .into_iter()
            .filter(|peer| peer.peer_id != *local)
            .filter(|peer| seen.insert(peer.peer_id.clone()))
            .collect();

        if peers == self.peers {
            return false;
        }
        tracing::debug!(count = peers.len(), "presence snapshot applied");
        self.peers = peers;
        true
    }

    /// Peers in snapshot order.
    #[must_use]
    pub fn peers(&self) -> &[PeerUser] {
        &self.peers
    }

    /// Look up a connected peer.
    #[must_use]
    pub fn get(&self, peer: &PeerId) -> Option<&PeerUser> {
        self.peers.iter().find(|p| p.peer_id == *peer)
    }

    /// Whether `peer` appears in the latest snapshot.
    #[must_use]
    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.get(peer).is_some()
    }

    /// Find a peer by exact id, or else by case-insensitive display name.
    #[must_use]
    pub fn find(&self, query: &str) -> Option<&PeerUser> {
        self.peers
            .iter()
            .find(|p| p.peer_id.as_str() == query)
            .or_else(|| {
                self.peers
                    .iter()
                    .find(|p| p.display_name.eq_ignore_ascii_case(query))
            })
    }
}
