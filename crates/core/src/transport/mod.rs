// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message transports between named peers
//!
//! The coordination protocol assumes delivery is reliable and FIFO for every
//! ordered (sender, receiver) pair. Nothing is assumed across senders.

pub mod memory;
pub mod tcp;
pub mod traced;

use crate::message::Frame;
use crate::request::PeerId;
use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpOptions, TcpTransport};
pub use traced::TracedTransport;

/// Errors from transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("transport closed")]
    Closed,
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("stream ended inside a frame")]
    Truncated,
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point-to-point and broadcast delivery of frames
///
/// `send` and `broadcast` only enqueue, so they are safe to call while the
/// protocol mutex is held.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_peer(&self) -> &PeerId;

    /// Every configured peer except the local one
    fn remote_peers(&self) -> &[PeerId];

    /// Queue a frame for one peer
    fn send(&self, to: &PeerId, frame: Frame) -> Result<(), TransportError>;

    /// Queue a frame for every remote peer
    fn broadcast(&self, frame: Frame) -> Result<(), TransportError> {
        for peer in self.remote_peers() {
            self.send(peer, frame.clone())?;
        }
        Ok(())
    }

    /// Wait for the next inbound frame; `Closed` once the transport shut down
    async fn recv(&self) -> Result<Frame, TransportError>;

    fn close(&self);
}
