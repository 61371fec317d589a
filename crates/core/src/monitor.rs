// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor: a distributed lock, its conditions and replicated state
//!
//! State is replicated by broadcasting a full snapshot at the end of every
//! entry while the lock is still held. Receivers overwrite their copy
//! wholesale; reads are eventually consistent, not linearizable.

use crate::condition::DistributedCondition;
use crate::error::{MonitorError, ProtocolError};
use crate::lock::{DistributedLock, LockShared};
use crate::message::{MessageHeader, MessageKind, StateBody};
use crate::messenger::Messenger;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

type SerializeFn<S> = Box<dyn Fn(&S) -> Result<Vec<u8>, MonitorError> + Send + Sync>;
type ApplyFn<S> = Box<dyn Fn(&mut S, &[u8]) -> Result<(), MonitorError> + Send + Sync>;

/// The two hooks a monitor needs to replicate application state
pub struct StateCodec<S> {
    serialize: SerializeFn<S>,
    apply: ApplyFn<S>,
}

impl<S> StateCodec<S> {
    pub fn new<E, A>(serialize: E, apply: A) -> Self
    where
        E: Fn(&S) -> Result<Vec<u8>, MonitorError> + Send + Sync + 'static,
        A: Fn(&mut S, &[u8]) -> Result<(), MonitorError> + Send + Sync + 'static,
    {
        Self {
            serialize: Box::new(serialize),
            apply: Box::new(apply),
        }
    }
}

impl<S: Serialize + DeserializeOwned> StateCodec<S> {
    /// Replicate the whole state as JSON
    pub fn json() -> Self {
        Self::new(
            |state: &S| serde_json::to_vec(state).map_err(|e| MonitorError::Codec(e.to_string())),
            |state: &mut S, bytes: &[u8]| {
                *state = serde_json::from_slice(bytes).map_err(|e| MonitorError::Codec(e.to_string()))?;
                Ok(())
            },
        )
    }
}

struct MonitorShared<S> {
    name: String,
    state: Mutex<S>,
    codec: StateCodec<S>,
    lock: Arc<LockShared>,
}

impl<S> MonitorShared<S> {
    fn state(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, header: &MessageHeader, body: &[u8]) -> Result<(), ProtocolError> {
        if header.kind != MessageKind::State {
            return Err(ProtocolError::UnexpectedKind {
                object: self.name.clone(),
                kind: header.kind,
            });
        }
        let body = StateBody::from_bytes(body)?;

        let mut protocol = self.lock.guard();
        protocol.clock.notify_sync(body.timestamp, &header.sender)?;
        (self.codec.apply)(&mut self.state(), &body.state)
            .map_err(|e| ProtocolError::State(e.to_string()))?;
        debug!(monitor = %self.name, from = %header.sender, time = protocol.clock.local_time(), "received STATE");
        protocol.clock.notify_event();
        Ok(())
    }

    /// Broadcast the local state; callers hold the distributed lock
    fn synchronize(&self) -> Result<(), MonitorError> {
        let mut protocol = self.lock.guard();
        protocol.clock.notify_event();
        let state = (self.codec.serialize)(&self.state())?;
        let body = StateBody {
            timestamp: protocol.clock.local_time(),
            state,
        }
        .to_bytes();
        self.lock
            .messenger
            .broadcast(self.lock.header(&self.name, MessageKind::State), body)
            .map_err(ProtocolError::from)?;
        debug!(monitor = %self.name, time = protocol.clock.local_time(), "sent STATE");
        protocol.clock.notify_event();
        Ok(())
    }
}

/// Access to the replicated state from inside [`Monitor::entry`]
///
/// Every call reads the current local copy, so changes applied by peers
/// while the entry was waiting on a condition are visible.
pub struct MonitorState<S> {
    shared: Arc<MonitorShared<S>>,
}

impl<S> MonitorState<S> {
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.shared.state())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.shared.state())
    }
}

/// Distributed monitor over application state `S`
pub struct Monitor<S> {
    shared: Arc<MonitorShared<S>>,
    lock: DistributedLock,
}

impl<S> Clone for Monitor<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<S: Send + 'static> Monitor<S> {
    /// Register the monitor's state, lock and message handlers
    ///
    /// State messages use `name`, the lock `"{name}/lock"`.
    pub fn new(
        name: impl Into<String>,
        messenger: &Messenger,
        initial: S,
        codec: StateCodec<S>,
    ) -> Result<Self, ProtocolError> {
        let name = name.into();
        let lock = DistributedLock::new(format!("{name}/lock"), messenger)?;
        let shared = Arc::new(MonitorShared {
            name: name.clone(),
            state: Mutex::new(initial),
            codec,
            lock: lock.shared.clone(),
        });

        let weak: Weak<MonitorShared<S>> = Arc::downgrade(&shared);
        messenger.register(name, move |header, body| match weak.upgrade() {
            Some(shared) => shared.handle(header, body),
            None => Err(ProtocolError::UnknownObject(header.object.clone())),
        })?;

        Ok(Self { shared, lock })
    }
}

impl<S> Monitor<S> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `f` as a critical section
    ///
    /// The state is broadcast and the lock released afterwards even when
    /// `f` fails; `f`'s error takes precedence.
    pub async fn entry<F, Fut, T>(&self, f: F) -> Result<T, MonitorError>
    where
        F: FnOnce(MonitorState<S>) -> Fut,
        Fut: Future<Output = Result<T, MonitorError>>,
    {
        self.lock.lock().await?;
        let result = f(MonitorState {
            shared: self.shared.clone(),
        })
        .await;

        // A wait that failed midway may have left the lock released
        if !self.lock.is_held() {
            return result;
        }
        let synced = self.shared.synchronize();
        let unlocked = self.lock.unlock();
        let value = result?;
        synced?;
        unlocked?;
        Ok(value)
    }

    /// Condition on the monitor's lock, named `"{name}/lock/{condition}"`
    pub fn condition(&self, name: &str) -> Result<DistributedCondition, ProtocolError> {
        self.lock.new_condition(name)
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Fail local waits and close the transport
    pub fn close(&self) {
        self.lock.close();
        self.shared.lock.messenger.close();
    }
}

impl<S: Clone> Monitor<S> {
    /// Copy of the local replica
    pub fn snapshot(&self) -> S {
        self.shared.state().clone()
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
