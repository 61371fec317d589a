// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-process message dispatch
//!
//! A [`Messenger`] owns the transport and a registry of handlers keyed by
//! logical object name. One receive loop per process pulls frames off the
//! transport and runs the matching handler synchronously.

use crate::error::ProtocolError;
use crate::message::{Frame, MessageHeader};
use crate::request::PeerId;
use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback for inbound messages addressed to one object
pub type Handler = Arc<dyn Fn(&MessageHeader, &[u8]) -> Result<(), ProtocolError> + Send + Sync>;

/// Handler registry and outbound path shared by every lock, condition and
/// monitor of one process
#[derive(Clone)]
pub struct Messenger {
    transport: Arc<dyn Transport>,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl Messenger {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.transport.local_peer()
    }

    pub fn remote_peers(&self) -> &[PeerId] {
        self.transport.remote_peers()
    }

    /// Route messages for `object` to `handler`
    pub fn register<F>(&self, object: impl Into<String>, handler: F) -> Result<(), ProtocolError>
    where
        F: Fn(&MessageHeader, &[u8]) -> Result<(), ProtocolError> + Send + Sync + 'static,
    {
        let object = object.into();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&object) {
            return Err(ProtocolError::DuplicateHandler(object));
        }
        debug!(object = %object, "registered handler");
        handlers.insert(object, Arc::new(handler));
        Ok(())
    }

    pub fn send(&self, to: &PeerId, header: MessageHeader, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport.send(to, Frame::new(header, body))
    }

    pub fn broadcast(&self, header: MessageHeader, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport.broadcast(Frame::new(header, body))
    }

    /// Run the handler registered for an inbound frame
    pub fn dispatch(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let header = &frame.header;
        if !self.remote_peers().contains(&header.sender) {
            return Err(ProtocolError::UnknownPeer(header.sender.clone()));
        }
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&header.object)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownObject(header.object.clone()))?;
        handler(header, &frame.body)
    }

    /// Spawn the receive loop; it ends when the transport closes
    pub fn start(&self) -> JoinHandle<()> {
        let messenger = self.clone();
        tokio::spawn(async move { messenger.receive_loop().await })
    }

    async fn receive_loop(self) {
        let local = self.local_peer().clone();
        debug!(local = %local, "receive loop started");
        loop {
            match self.transport.recv().await {
                Ok(frame) => {
                    if let Err(e) = self.dispatch(&frame) {
                        warn!(
                            local = %local,
                            object = %frame.header.object,
                            sender = %frame.header.sender,
                            kind = ?frame.header.kind,
                            error = %e,
                            "dropped message"
                        );
                    }
                }
                Err(TransportError::Closed) => break,
                Err(e) => warn!(local = %local, error = %e, "receive failed"),
            }
        }
        debug!(local = %local, "receive loop stopped");
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

#[cfg(test)]
#[path = "messenger_tests.rs"]
mod tests;
