// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lamport logical clock
//!
//! One scalar clock per process plus the last timestamp observed from every
//! remote peer. The clock is plain data: callers guard it with the protocol
//! mutex of the lock that owns it.

use crate::error::ProtocolError;
use crate::request::PeerId;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct LamportClock {
    local_time: u64,
    last_seen: BTreeMap<PeerId, u64>,
}

impl LamportClock {
    /// Create a clock tracking `remote_peers`, all starting at 0
    pub fn new<'a>(remote_peers: impl IntoIterator<Item = &'a PeerId>) -> Self {
        Self {
            local_time: 0,
            last_seen: remote_peers.into_iter().map(|p| (p.clone(), 0)).collect(),
        }
    }

    pub fn local_time(&self) -> u64 {
        self.local_time
    }

    /// Last timestamp observed from `peer`, if it is tracked
    pub fn last_seen(&self, peer: &PeerId) -> Option<u64> {
        self.last_seen.get(peer).copied()
    }

    /// Advance for a locally originated send
    pub fn notify_event(&mut self) {
        self.local_time += 1;
    }

    /// Record a timestamp received from `peer` and move past it
    ///
    /// The last-seen value never decreases: condition messages held in a
    /// reorder buffer may be applied after newer lock traffic from the same
    /// peer.
    pub fn notify_sync(&mut self, timestamp: u64, peer: &PeerId) -> Result<(), ProtocolError> {
        let Some(seen) = self.last_seen.get_mut(peer) else {
            return Err(ProtocolError::UnknownPeer(peer.clone()));
        };
        *seen = (*seen).max(timestamp);
        self.local_time = self.local_time.max(timestamp) + 1;
        Ok(())
    }

    /// True iff every remote peer has been seen strictly after `timestamp`
    ///
    /// Vacuously true when there are no remote peers.
    pub fn all_remote_later_than(&self, timestamp: u64) -> bool {
        self.last_seen.values().all(|&seen| seen > timestamp)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
