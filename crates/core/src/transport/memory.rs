// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process transport for tests and single-process clusters

use super::{Transport, TransportError};
use crate::message::Frame;
use crate::request::PeerId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch, Mutex};

/// Builds a fully connected set of in-memory endpoints
pub struct MemoryNetwork;

impl MemoryNetwork {
    /// One endpoint per peer, in the order given
    pub fn connect(peers: &[PeerId]) -> Vec<MemoryTransport> {
        let mut senders = HashMap::new();
        let mut receivers = Vec::with_capacity(peers.len());
        for peer in peers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(peer.clone(), tx);
            receivers.push(rx);
        }

        peers
            .iter()
            .zip(receivers)
            .map(|(local, inbox)| {
                let outboxes: HashMap<PeerId, mpsc::UnboundedSender<Frame>> = senders
                    .iter()
                    .filter(|(peer, _)| *peer != local)
                    .map(|(peer, tx)| (peer.clone(), tx.clone()))
                    .collect();
                let remotes = peers.iter().filter(|p| *p != local).cloned().collect();
                let (closed, _) = watch::channel(false);
                MemoryTransport {
                    local: local.clone(),
                    remotes,
                    outboxes,
                    inbox: Mutex::new(inbox),
                    closed,
                }
            })
            .collect()
    }
}

/// One peer's endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    local: PeerId,
    remotes: Vec<PeerId>,
    outboxes: HashMap<PeerId, mpsc::UnboundedSender<Frame>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: watch::Sender<bool>,
}

impl MemoryTransport {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    fn remote_peers(&self) -> &[PeerId] {
        &self.remotes
    }

    fn send(&self, to: &PeerId, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let outbox = self
            .outboxes
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        // A peer that already dropped its endpoint no longer cares
        let _ = outbox.send(frame);
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            frame = inbox.recv() => frame.ok_or(TransportError::Closed),
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
