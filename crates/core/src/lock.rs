// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock using Lamport's total-order mutual exclusion
//!
//! Every peer keeps its own copy of the request queue. A peer enters when its
//! own request heads the local queue and every remote peer has been heard
//! from at a later timestamp; with FIFO channels that proves no smaller
//! request is still in flight.

use crate::clock::LamportClock;
use crate::condition::{ConditionState, DistributedCondition};
use crate::error::{LockError, ProtocolError};
use crate::message::{decode, encode, MessageHeader, MessageKind, TimestampedBody};
use crate::messenger::Messenger;
use crate::request::{PeerId, Request, RequestQueue};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Local view of the lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockPhase {
    Idle,
    Requesting,
    Holding,
}

/// Outcome of a bounded lock attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    TimedOut,
    Cancelled,
}

/// What the local peer is doing with one of its own queued requests
#[derive(Debug)]
enum LocalRequest {
    Waiting(oneshot::Sender<()>),
    Holding,
    /// The caller gave up; the request is released as soon as it is granted
    Abandoned,
}

/// Everything guarded by the protocol mutex
///
/// The lock, its conditions and the owning monitor share this one mutex, so
/// queue mutation, clock updates and wake decisions are atomic with respect
/// to each other and to inbound messages.
pub(crate) struct ProtocolState {
    pub(crate) clock: LamportClock,
    queue: RequestQueue,
    local: BTreeMap<Request, LocalRequest>,
    pub(crate) conditions: HashMap<String, ConditionState>,
    closed: bool,
}

impl ProtocolState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

pub(crate) struct LockShared {
    pub(crate) name: String,
    pub(crate) local: PeerId,
    pub(crate) messenger: Messenger,
    state: Mutex<ProtocolState>,
}

impl LockShared {
    pub(crate) fn guard(&self) -> MutexGuard<'_, ProtocolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn header(&self, object: &str, kind: MessageKind) -> MessageHeader {
        MessageHeader::new(object, self.local.clone(), kind)
    }

    fn broadcast_timestamp(&self, kind: MessageKind, timestamp: u64) -> Result<(), ProtocolError> {
        let body = encode(&TimestampedBody { timestamp })?;
        self.messenger.broadcast(self.header(&self.name, kind), body)?;
        Ok(())
    }

    /// Request the lock and wait for the grant
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<(), LockError> {
        let mut pending = self.enqueue()?;
        pending.granted().await
    }

    /// Queue a local request and announce it
    fn enqueue(self: &Arc<Self>) -> Result<PendingAcquire, LockError> {
        let mut state = self.guard();
        if state.closed {
            return Err(LockError::Closed {
                name: self.name.clone(),
            });
        }

        let request = Request::new(state.clock.local_time(), self.local.clone());
        self.broadcast_timestamp(MessageKind::Request, request.priority)?;
        let (tx, rx) = oneshot::channel();
        state.queue.push(request.clone());
        state.local.insert(request.clone(), LocalRequest::Waiting(tx));
        state.clock.notify_event();
        debug!(lock = %self.name, time = state.clock.local_time(), queue = %state.queue, "requested");

        self.try_release(&mut state)?;
        Ok(PendingAcquire {
            shared: self.clone(),
            request,
            rx,
            settled: false,
        })
    }

    /// The request the local peer currently holds the lock with
    pub(crate) fn holding(&self, state: &ProtocolState) -> Option<Request> {
        state
            .local
            .iter()
            .find(|(_, status)| matches!(status, LocalRequest::Holding))
            .map(|(request, _)| request.clone())
    }

    /// Release the lock held by the local peer
    pub(crate) fn release(&self, state: &mut ProtocolState) -> Result<(), LockError> {
        let head = state.queue.head().cloned();
        let held = match head {
            Some(head) if matches!(state.local.get(&head), Some(LocalRequest::Holding)) => head,
            _ => {
                return Err(LockError::NotHolder {
                    name: self.name.clone(),
                })
            }
        };

        info!(lock = %self.name, time = state.clock.local_time(), peer = %self.local, "leave critical section");
        self.release_request(state, &held)?;
        Ok(())
    }

    /// Drop one of our own requests and hand the lock on
    fn release_request(&self, state: &mut ProtocolState, request: &Request) -> Result<(), ProtocolError> {
        self.withdraw(state, request)?;
        self.try_release(state)
    }

    /// Remove one of our own requests from the queue and announce it
    fn withdraw(&self, state: &mut ProtocolState, request: &Request) -> Result<(), ProtocolError> {
        state.queue.remove(request);
        state.local.remove(request);
        self.broadcast_timestamp(MessageKind::Release, state.clock.local_time())?;
        state.clock.notify_event();
        debug!(lock = %self.name, time = state.clock.local_time(), queue = %state.queue, "released");
        Ok(())
    }

    /// Wake the local caller whose request may now enter
    fn try_release(&self, state: &mut ProtocolState) -> Result<(), ProtocolError> {
        loop {
            let Some(head) = state.queue.head().cloned() else {
                return Ok(());
            };
            if head.host != self.local || !state.clock.all_remote_later_than(head.priority) {
                return Ok(());
            }

            match state.local.remove(&head) {
                Some(LocalRequest::Waiting(tx)) => {
                    if tx.send(()).is_ok() {
                        state.local.insert(head, LocalRequest::Holding);
                        info!(lock = %self.name, time = state.clock.local_time(), peer = %self.local, "enter critical section");
                        return Ok(());
                    }
                    // The waiting future was dropped before the grant
                    state.local.insert(head.clone(), LocalRequest::Abandoned);
                }
                Some(LocalRequest::Holding) => {
                    state.local.insert(head, LocalRequest::Holding);
                    return Ok(());
                }
                Some(LocalRequest::Abandoned) => {
                    state.local.insert(head.clone(), LocalRequest::Abandoned);
                }
                None => {
                    warn!(lock = %self.name, request = %head, "own request has no local record");
                    return Ok(());
                }
            }

            warn!(lock = %self.name, request = %head, "releasing abandoned request");
            self.withdraw(state, &head)?;
        }
    }

    fn handle(&self, header: &MessageHeader, body: &[u8]) -> Result<(), ProtocolError> {
        let body: TimestampedBody = decode(body)?;
        let mut state = self.guard();
        state.clock.notify_sync(body.timestamp, &header.sender)?;

        match header.kind {
            MessageKind::Request => {
                state
                    .queue
                    .push(Request::new(body.timestamp, header.sender.clone()));
                debug!(lock = %self.name, from = %header.sender, time = state.clock.local_time(), queue = %state.queue, "received REQUEST");
                let reply = encode(&TimestampedBody {
                    timestamp: state.clock.local_time(),
                })?;
                self.messenger.send(
                    &header.sender,
                    self.header(&self.name, MessageKind::Response),
                    reply,
                )?;
                state.clock.notify_event();
            }
            MessageKind::Response => {
                debug!(lock = %self.name, from = %header.sender, time = state.clock.local_time(), queue = %state.queue, "received RESPONSE");
            }
            MessageKind::Release => {
                if state.queue.remove_first_from(&header.sender).is_none() {
                    return Err(ProtocolError::NoRequest {
                        object: self.name.clone(),
                        peer: header.sender.clone(),
                    });
                }
                debug!(lock = %self.name, from = %header.sender, time = state.clock.local_time(), queue = %state.queue, "received RELEASE");
            }
            kind => {
                return Err(ProtocolError::UnexpectedKind {
                    object: self.name.clone(),
                    kind,
                })
            }
        }

        self.try_release(&mut state)
    }

    /// Fail every local wait; used on shutdown
    fn close(&self) {
        let mut state = self.guard();
        state.closed = true;
        state
            .local
            .retain(|_, status| !matches!(status, LocalRequest::Waiting(_)));
        for condition in state.conditions.values_mut() {
            condition.close();
        }
    }
}

/// A lock request that has been broadcast but not yet observed as granted
///
/// Dropping it before the grant is observed abandons the request; if the
/// grant already happened the lock is released again.
struct PendingAcquire {
    shared: Arc<LockShared>,
    request: Request,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingAcquire {
    async fn granted(&mut self) -> Result<(), LockError> {
        (&mut self.rx).await.map_err(|_| LockError::Closed {
            name: self.shared.name.clone(),
        })?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let shared = &self.shared;
        let mut state = shared.guard();
        match state.local.get(&self.request) {
            Some(LocalRequest::Waiting(_)) => {
                debug!(lock = %shared.name, request = %self.request, "abandoned wait");
                state
                    .local
                    .insert(self.request.clone(), LocalRequest::Abandoned);
            }
            Some(LocalRequest::Holding) => {
                warn!(lock = %shared.name, request = %self.request, "grant arrived after wait was abandoned");
                if let Err(e) = shared.release_request(&mut state, &self.request) {
                    warn!(lock = %shared.name, error = %e, "failed to release abandoned grant");
                }
            }
            _ => {}
        }
    }
}

/// Replicated mutual-exclusion lock shared by a fixed set of peers
///
/// The messenger only holds a weak reference; the local peer stops
/// answering for the lock once every handle is dropped, which stalls the
/// other peers.
#[derive(Clone)]
pub struct DistributedLock {
    pub(crate) shared: Arc<LockShared>,
}

impl DistributedLock {
    /// Create the lock and register its message handler
    pub fn new(name: impl Into<String>, messenger: &Messenger) -> Result<Self, ProtocolError> {
        let name = name.into();
        let shared = Arc::new(LockShared {
            name: name.clone(),
            local: messenger.local_peer().clone(),
            messenger: messenger.clone(),
            state: Mutex::new(ProtocolState {
                clock: LamportClock::new(messenger.remote_peers()),
                queue: RequestQueue::new(),
                local: BTreeMap::new(),
                conditions: HashMap::new(),
                closed: false,
            }),
        });

        let weak: Weak<LockShared> = Arc::downgrade(&shared);
        messenger.register(name.clone(), move |header, body| match weak.upgrade() {
            Some(shared) => shared.handle(header, body),
            None => Err(ProtocolError::UnknownObject(header.object.clone())),
        })?;

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Block until the local peer holds the lock
    pub async fn lock(&self) -> Result<(), LockError> {
        self.shared.acquire().await
    }

    /// Like [`lock`](Self::lock), giving up once `cancel` completes
    ///
    /// A request given up on stays in every peer's queue; the local peer
    /// releases it as soon as it would have been granted.
    pub async fn lock_until<C>(&self, cancel: C) -> Result<Acquisition, LockError>
    where
        C: Future<Output = ()>,
    {
        let mut pending = self.shared.enqueue()?;
        tokio::select! {
            granted = pending.granted() => granted.map(|()| Acquisition::Acquired),
            () = cancel => Ok(Acquisition::Cancelled),
        }
    }

    pub async fn lock_timeout(&self, timeout: Duration) -> Result<Acquisition, LockError> {
        let acquisition = self.lock_until(tokio::time::sleep(timeout)).await?;
        Ok(match acquisition {
            Acquisition::Cancelled => Acquisition::TimedOut,
            other => other,
        })
    }

    pub fn unlock(&self) -> Result<(), LockError> {
        let mut state = self.shared.guard();
        self.shared.release(&mut state)
    }

    /// Create a condition bound to this lock, named `"{lock}/{name}"`
    pub fn new_condition(&self, name: &str) -> Result<DistributedCondition, ProtocolError> {
        DistributedCondition::new(format!("{}/{}", self.shared.name, name), self.shared.clone())
    }

    pub fn phase(&self) -> LockPhase {
        let state = self.shared.guard();
        let mut phase = LockPhase::Idle;
        for status in state.local.values() {
            match status {
                LocalRequest::Holding => return LockPhase::Holding,
                LocalRequest::Waiting(_) => phase = LockPhase::Requesting,
                LocalRequest::Abandoned => {}
            }
        }
        phase
    }

    pub fn is_held(&self) -> bool {
        self.phase() == LockPhase::Holding
    }

    /// The request the local peer holds the lock with
    pub fn held_request(&self) -> Option<Request> {
        let state = self.shared.guard();
        self.shared.holding(&state)
    }

    /// Snapshot of the local copy of the request queue
    pub fn queue(&self) -> Vec<Request> {
        self.shared.guard().queue.iter().cloned().collect()
    }

    pub fn local_time(&self) -> u64 {
        self.shared.guard().clock.local_time()
    }

    /// Fail all pending local waits; later `lock()` calls return `Closed`
    pub fn close(&self) {
        self.shared.close();
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
