// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the coordination protocol

use crate::message::MessageKind;
use crate::request::PeerId;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors raised while handling or producing protocol messages
///
/// Inbound messages that fail with one of these are dropped by the receive
/// loop; they never corrupt the replicated queues.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no handler registered for object: {0}")]
    UnknownObject(String),
    #[error("message from unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("handler already registered for object: {0}")]
    DuplicateHandler(String),
    #[error("unexpected {kind:?} message for object {object}")]
    UnexpectedKind { object: String, kind: MessageKind },
    #[error("{object}: no queued request from {peer}")]
    NoRequest { object: String, peer: PeerId },
    #[error("{object}: signal from {peer} with no waiters")]
    NoWaiters { object: String, peer: PeerId },
    #[error("{object}: sequence {sequence} from {peer} was already applied")]
    StaleSequence {
        object: String,
        peer: PeerId,
        sequence: u64,
    },
    #[error("{kind:?} body of {len} bytes is too short")]
    ShortBody { kind: MessageKind, len: usize },
    #[error("malformed message body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("state rejected: {0}")]
    State(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from distributed lock and condition operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("{name}: lock is not held by the local peer")]
    NotHolder { name: String },
    #[error("{name}: wait ended because the lock was shut down")]
    Closed { name: String },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<TransportError> for LockError {
    fn from(e: TransportError) -> Self {
        LockError::Protocol(ProtocolError::Transport(e))
    }
}

/// Errors from monitor entry and state replication
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("state codec error: {0}")]
    Codec(String),
    #[error("buffer capacity must be at least 1")]
    ZeroCapacity,
}
