// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dm-core: distributed monitor built on Lamport mutual exclusion
//!
//! This crate provides:
//! - A Lamport clock and totally ordered request queues
//! - A distributed lock and condition variables bound to it
//! - A monitor that replicates application state between critical sections
//! - In-memory and TCP transports behind one `Transport` trait
//! - A bounded buffer built on the monitor

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod messenger;
pub mod request;
pub mod transport;

// Protocol layers (order matters for dependencies)
pub mod lock;
pub mod condition;
pub mod monitor;
pub mod buffer;

// Re-exports
pub use buffer::BoundedBuffer;
pub use clock::LamportClock;
pub use condition::DistributedCondition;
pub use config::{ClusterConfig, ConfigError};
pub use error::{LockError, MonitorError, ProtocolError};
pub use lock::{Acquisition, DistributedLock, LockPhase};
pub use message::{Frame, MessageHeader, MessageKind};
pub use messenger::Messenger;
pub use monitor::{Monitor, MonitorState, StateCodec};
pub use request::{PeerId, Request, RequestQueue};
pub use transport::{
    MemoryNetwork, MemoryTransport, TcpOptions, TcpTransport, TracedTransport, Transport,
    TransportError,
};
