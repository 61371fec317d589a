// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed condition variable bound to a [`DistributedLock`]
//!
//! AWAIT and SIGNAL messages carry a per-condition sequence number. Only the
//! lock holder sends them, so the counter totals the order of all waits and
//! signals; receivers apply them strictly in that order and hold early
//! arrivals in a reorder buffer.
//!
//! A signal that lands on a local waiter which has since given up is passed
//! on to the next waiter, so cancelling a wait never swallows a wakeup.
//!
//! [`DistributedLock`]: crate::lock::DistributedLock

use crate::error::{LockError, ProtocolError};
use crate::lock::{LockShared, ProtocolState};
use crate::message::{decode, encode, ConditionBody, MessageHeader, MessageKind};
use crate::request::{PeerId, Request, RequestQueue};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A condition message that arrived ahead of its predecessors
#[derive(Debug)]
struct Buffered {
    sender: PeerId,
    kind: MessageKind,
    body: ConditionBody,
}

/// A local task blocked in [`DistributedCondition::wait`]
#[derive(Debug)]
enum LocalWaiter {
    Waiting(oneshot::Sender<()>),
    /// The wait was dropped; its replicated entry stays queued
    Abandoned,
}

/// Per-condition protocol state, kept inside the lock's protocol mutex
#[derive(Debug, Default)]
pub(crate) struct ConditionState {
    waiters: RequestQueue,
    local_waiters: HashMap<Request, LocalWaiter>,
    /// Tag of the next AWAIT/SIGNAL, sent or applied
    sequence: u64,
    buffered: BTreeMap<u64, Buffered>,
}

impl ConditionState {
    pub(crate) fn close(&mut self) {
        self.local_waiters.clear();
    }

    /// Hand a signal to a local waiter; false if that waiter gave up
    fn wake(&mut self, name: &str, request: &Request) -> bool {
        match self.local_waiters.remove(request) {
            Some(LocalWaiter::Waiting(tx)) => tx.send(()).is_ok(),
            Some(LocalWaiter::Abandoned) => false,
            None => {
                warn!(condition = %name, request = %request, "no local waiter for signal");
                true
            }
        }
    }
}

/// Condition variable whose waiter queue is replicated across peers
#[derive(Clone)]
pub struct DistributedCondition {
    name: String,
    lock: Arc<LockShared>,
}

impl DistributedCondition {
    pub(crate) fn new(name: String, lock: Arc<LockShared>) -> Result<Self, ProtocolError> {
        let weak: Weak<LockShared> = Arc::downgrade(&lock);
        let handler_name = name.clone();
        lock.messenger
            .register(name.clone(), move |header, body| match weak.upgrade() {
                Some(lock) => handle(&lock, &handler_name, header, body),
                None => Err(ProtocolError::UnknownObject(header.object.clone())),
            })?;
        lock.guard()
            .conditions
            .insert(name.clone(), ConditionState::default());
        Ok(Self { name, lock })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock, wait for a signal, then take the lock again
    ///
    /// Queuing the waiter, announcing it and releasing the lock happen in
    /// one critical section, so a signal cannot slip in between. Dropping
    /// the future before the lock is back passes any signal it received or
    /// will receive on to the next waiter.
    pub async fn wait(&self) -> Result<(), LockError> {
        let mut pending = {
            let mut guard = self.lock.guard();
            let state = &mut *guard;
            if self.lock.holding(state).is_none() {
                return Err(LockError::NotHolder {
                    name: self.name.clone(),
                });
            }

            let time = state.clock.local_time();
            let request = Request::new(time, self.lock.local.clone());
            let condition = state
                .conditions
                .get_mut(&self.name)
                .ok_or_else(|| ProtocolError::UnknownObject(self.name.clone()))?;
            let body = encode(&ConditionBody {
                sequence: condition.sequence,
                timestamp: request.priority,
            })?;
            self.lock.messenger.broadcast(
                self.lock.header(&self.name, MessageKind::AwaitOnCondition),
                body,
            )?;

            let (tx, rx) = oneshot::channel();
            condition.waiters.push(request.clone());
            condition
                .local_waiters
                .insert(request.clone(), LocalWaiter::Waiting(tx));
            condition.sequence += 1;
            debug!(condition = %self.name, time, waiters = %condition.waiters, "await");
            state.clock.notify_event();

            self.lock.release(state)?;
            PendingWait {
                lock: self.lock.clone(),
                name: self.name.clone(),
                request,
                rx,
                settled: false,
            }
        };

        (&mut pending.rx).await.map_err(|_| LockError::Closed {
            name: self.name.clone(),
        })?;
        self.lock.acquire().await?;
        pending.settled = true;
        Ok(())
    }

    /// Wake the longest-waiting peer, if any
    ///
    /// Returns whether a waiter was signalled.
    pub fn signal(&self) -> Result<bool, LockError> {
        let mut guard = self.lock.guard();
        let state = &mut *guard;
        if self.lock.holding(state).is_none() {
            return Err(LockError::NotHolder {
                name: self.name.clone(),
            });
        }
        signal_next(&self.lock, state, &self.name)
    }

    /// Snapshot of the replicated waiter queue
    pub fn waiting(&self) -> Vec<Request> {
        let state = self.lock.guard();
        state
            .conditions
            .get(&self.name)
            .map(|c| c.waiters.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages held back waiting for a predecessor
    pub fn buffered(&self) -> usize {
        let state = self.lock.guard();
        state
            .conditions
            .get(&self.name)
            .map(|c| c.buffered.len())
            .unwrap_or_default()
    }
}

/// A wait that has queued its waiter and released the lock
///
/// Dropped before the lock is back: a waiter still queued is marked
/// abandoned, a waiter already signalled passes the signal on.
struct PendingWait {
    lock: Arc<LockShared>,
    name: String,
    request: Request,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.lock.guard();
        if state.is_closed() {
            return;
        }
        let Ok(condition) = condition_mut(&mut state, &self.name) else {
            return;
        };
        // Still queued, so no signal has reached it yet
        let queued = match condition.local_waiters.get_mut(&self.request) {
            Some(waiter) => {
                *waiter = LocalWaiter::Abandoned;
                true
            }
            None => false,
        };
        drop(state);

        if queued {
            debug!(condition = %self.name, request = %self.request, "abandoned wait");
        } else {
            warn!(condition = %self.name, request = %self.request, "wait abandoned after its signal");
            forward_signal(&self.lock, &self.name);
        }
    }
}

/// Signal the head waiter, skipping local waiters that gave up
///
/// The caller holds the lock. Every skipped waiter costs one SIGNAL, which
/// keeps the replicated queues in step.
fn signal_next(lock: &LockShared, state: &mut ProtocolState, name: &str) -> Result<bool, LockError> {
    loop {
        let timestamp = state.clock.local_time();
        let condition = condition_mut(state, name)?;
        let Some(top) = condition.waiters.head().cloned() else {
            return Ok(false);
        };
        let body = encode(&ConditionBody {
            sequence: condition.sequence,
            timestamp,
        })?;
        lock.messenger
            .broadcast(lock.header(name, MessageKind::SignalOnCondition), body)?;

        condition.sequence += 1;
        condition.waiters.pop_head();
        debug!(condition = %name, time = timestamp, waiters = %condition.waiters, "signal");
        let woken = top.host != lock.local || condition.wake(name, &top);
        state.clock.notify_event();
        if woken {
            return Ok(true);
        }
        debug!(condition = %name, request = %top, "waiter gave up, passing the signal on");
    }
}

/// Take the lock for a local waiter that gave up after being signalled and
/// pass its signal on
fn forward_signal(lock: &Arc<LockShared>, name: &str) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(condition = %name, "no runtime to pass a signal on");
        return;
    };
    let lock = lock.clone();
    let name = name.to_string();
    runtime.spawn(async move {
        if let Err(e) = lock.acquire().await {
            warn!(condition = %name, error = %e, "could not take the lock to pass a signal on");
            return;
        }
        let mut state = lock.guard();
        if let Err(e) = signal_next(&lock, &mut state, &name) {
            warn!(condition = %name, error = %e, "failed to pass a signal on");
        }
        if let Err(e) = lock.release(&mut state) {
            warn!(condition = %name, error = %e, "failed to release after passing a signal on");
        }
    });
}

fn condition_mut<'a>(state: &'a mut ProtocolState, name: &str) -> Result<&'a mut ConditionState, ProtocolError> {
    state
        .conditions
        .get_mut(name)
        .ok_or_else(|| ProtocolError::UnknownObject(name.to_string()))
}

fn handle(lock: &Arc<LockShared>, name: &str, header: &MessageHeader, body: &[u8]) -> Result<(), ProtocolError> {
    if !matches!(
        header.kind,
        MessageKind::AwaitOnCondition | MessageKind::SignalOnCondition
    ) {
        return Err(ProtocolError::UnexpectedKind {
            object: name.to_string(),
            kind: header.kind,
        });
    }
    let body: ConditionBody = decode(body)?;

    let mut guard = lock.guard();
    let state = &mut *guard;
    let expected = condition_mut(state, name)?.sequence;

    if body.sequence < expected {
        return Err(ProtocolError::StaleSequence {
            object: name.to_string(),
            peer: header.sender.clone(),
            sequence: body.sequence,
        });
    }
    if body.sequence > expected {
        let condition = condition_mut(state, name)?;
        if condition.buffered.contains_key(&body.sequence) {
            return Err(ProtocolError::StaleSequence {
                object: name.to_string(),
                peer: header.sender.clone(),
                sequence: body.sequence,
            });
        }
        debug!(condition = %name, sequence = body.sequence, expected, "buffered out-of-order message");
        condition.buffered.insert(
            body.sequence,
            Buffered {
                sender: header.sender.clone(),
                kind: header.kind,
                body,
            },
        );
        return Ok(());
    }

    let result = apply(lock, state, name, &header.sender, header.kind, &body);
    loop {
        let condition = condition_mut(state, name)?;
        let next = condition.sequence;
        let Some(message) = condition.buffered.remove(&next) else {
            break;
        };
        if let Err(e) = apply(lock, state, name, &message.sender, message.kind, &message.body) {
            warn!(condition = %name, sequence = next, error = %e, "dropped buffered message");
        }
    }
    result
}

/// Apply one in-order condition message; the sequence advances even if the
/// message turns out to be invalid
fn apply(
    lock: &Arc<LockShared>,
    state: &mut ProtocolState,
    name: &str,
    sender: &PeerId,
    kind: MessageKind,
    body: &ConditionBody,
) -> Result<(), ProtocolError> {
    condition_mut(state, name)?.sequence += 1;
    state.clock.notify_sync(body.timestamp, sender)?;
    let time = state.clock.local_time();
    let condition = condition_mut(state, name)?;

    match kind {
        MessageKind::AwaitOnCondition => {
            condition
                .waiters
                .push(Request::new(body.timestamp, sender.clone()));
            debug!(condition = %name, from = %sender, time, waiters = %condition.waiters, "received AWAIT");
        }
        MessageKind::SignalOnCondition => {
            let top = condition
                .waiters
                .pop_head()
                .ok_or_else(|| ProtocolError::NoWaiters {
                    object: name.to_string(),
                    peer: sender.clone(),
                })?;
            debug!(condition = %name, from = %sender, time, waiters = %condition.waiters, "received SIGNAL");
            if top.host == lock.local && !condition.wake(name, &top) {
                debug!(condition = %name, request = %top, "signalled waiter gave up");
                forward_signal(lock, name);
            }
        }
        kind => {
            return Err(ProtocolError::UnexpectedKind {
                object: name.to_string(),
                kind,
            })
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
