//! Unread-message counters per peer.
//!
//! Server pushes (full snapshots and per-peer updates) are merged with
//! optimistic local clears. A local clear leaves a [`ClearMark`]; while it
//! is outstanding, server pushes for that peer are assumed to predate the
//! clear and are ignored unless they carry an `asOf` time newer than the
//! mark. The mark is released when the server acknowledges the clear or a
//! new live message from the peer arrives.

use std::collections::{BTreeMap, HashMap};

use vibetalk_proto::event::UnreadUpdate;
use vibetalk_proto::message::{PeerId, Timestamp};

/// Record of an optimistic local clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMark {
    /// Local monotonic counter, increasing with every clear.
    pub version: u64,
    /// Local wall-clock time of the clear.
    pub at: Timestamp,
}

/// Result of applying a server push for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The count changed.
    Applied,
    /// The push matched the current count.
    Unchanged,
    /// The peer's conversation is active; the count stays zero.
    SuppressedActive {
        /// The push carried a positive count, so the server still thinks
        /// there are unread messages.
        had_unread: bool,
    },
    /// An outstanding clear mark is newer than the push.
    Stale,
}

/// Result of applying a full snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// The visible map changed.
    pub changed: bool,
    /// The active peer was listed with a positive count.
    pub active_had_unread: bool,
}

/// Unread counts per peer. An absent entry means zero.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    counts: BTreeMap<PeerId, u32>,
    marks: HashMap<PeerId, ClearMark>,
    next_version: u64,
}

impl NotificationTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unread count for `peer`.
    #[must_use]
    pub fn count(&self, peer: &PeerId) -> u32 {
        self.counts.get(peer).copied().unwrap_or(0)
    }

    /// Every non-zero count.
    #[must_use]
    pub const fn counts(&self) -> &BTreeMap<PeerId, u32> {
        &self.counts
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    /// Outstanding clear mark for `peer`, if any.
    #[must_use]
    pub fn mark(&self, peer: &PeerId) -> Option<ClearMark> {
        self.marks.get(peer).copied()
    }

    fn set(&mut self, peer: &PeerId, count: u32) -> bool {
        if count == 0 {
            self.counts.remove(peer).is_some()
        } else {
            self.counts.insert(peer.clone(), count) != Some(count)
        }
    }

    /// Count a newly appended private message from `peer`.
    ///
    /// The message postdates any local clear, so it releases the mark.
    /// Nothing is counted while `peer` is active. Returns `true` if the
    /// count changed.
    pub fn record_message(&mut self, peer: &PeerId, active: Option<&PeerId>) -> bool {
        self.marks.remove(peer);
        if active == Some(peer) {
            return false;
        }
        let count = self.count(peer).saturating_add(1);
        self.set(peer, count)
    }

    /// Zero `peer` locally and leave a clear mark.
    pub fn clear_local(&mut self, peer: &PeerId, now: Timestamp) -> ClearMark {
        self.next_version += 1;
        let mark = ClearMark {
            version: self.next_version,
            at: now,
        };
        self.counts.remove(peer);
        self.marks.insert(peer.clone(), mark);
        tracing::debug!(%peer, version = mark.version, "optimistic unread clear");
        mark
    }

    /// Apply the server's acknowledgement that `peer` was cleared.
    ///
    /// Returns `true` if the count changed.
    pub fn apply_cleared(&mut self, peer: &PeerId) -> bool {
        self.marks.remove(peer);
        self.counts.remove(peer).is_some()
    }

    /// Apply a single-peer update.
    pub fn apply_update(&mut self, update: &UnreadUpdate, active: Option<&PeerId>) -> PushOutcome {
        let peer = &update.peer_id;
        if active == Some(peer) {
            self.counts.remove(peer);
            return PushOutcome::SuppressedActive {
                had_unread: update.count > 0,
            };
        }

        if let Some(mark) = self.marks.get(peer) {
            match update.as_of {
                Some(as_of) if as_of > mark.at => {
                    self.marks.remove(peer);
                }
                _ => {
                    tracing::debug!(%peer, version = mark.version, "ignoring unread update older than local clear");
                    return PushOutcome::Stale;
                }
            }
        }

        if self.set(peer, update.count) {
            PushOutcome::Applied
        } else {
            PushOutcome::Unchanged
        }
    }

    /// Replace the whole map with a server snapshot.
    ///
    /// Peers with an outstanding clear mark keep their local count; the
    /// active peer stays at zero.
    pub fn apply_snapshot(
        &mut self,
        snapshot: BTreeMap<PeerId, u32>,
        active: Option<&PeerId>,
    ) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();
        let mut next: BTreeMap<PeerId, u32> = self
            .counts
            .iter()
            .filter(|(peer, _)| self.marks.contains_key(*peer))
            .map(|(peer, &count)| (peer.clone(), count))
            .collect();

        for (peer, count) in snapshot {
            if count == 0 || self.marks.contains_key(&peer) {
                continue;
            }
            if active == Some(&peer) {
                outcome.active_had_unread = true;
                continue;
            }
            next.insert(peer, count);
        }

        outcome.changed = next != self.counts;
        self.counts = next;
        outcome
    }
}
