// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced transport wrapper for consistent observability

use super::{Transport, TransportError};
use crate::message::Frame;
use crate::request::PeerId;
use async_trait::async_trait;

/// Wrapper that adds tracing to any Transport
pub struct TracedTransport<T> {
    inner: T,
}

impl<T> TracedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for TracedTransport<T> {
    fn local_peer(&self) -> &PeerId {
        self.inner.local_peer()
    }

    fn remote_peers(&self) -> &[PeerId] {
        self.inner.remote_peers()
    }

    fn send(&self, to: &PeerId, frame: Frame) -> Result<(), TransportError> {
        let span = tracing::debug_span!("transport.send", to = %to, object = %frame.header.object);
        let _guard = span.enter();

        let kind = frame.header.kind;
        let body_len = frame.body.len();
        let result = self.inner.send(to, frame);
        match &result {
            Ok(()) => tracing::debug!(?kind, body_len, "queued"),
            Err(e) => tracing::error!(?kind, error = %e, "send failed"),
        }
        result
    }

    fn broadcast(&self, frame: Frame) -> Result<(), TransportError> {
        let span = tracing::debug_span!("transport.broadcast", object = %frame.header.object);
        let _guard = span.enter();

        let kind = frame.header.kind;
        let peers = self.inner.remote_peers().len();
        let result = self.inner.broadcast(frame);
        match &result {
            Ok(()) => tracing::debug!(?kind, peers, "queued for all"),
            Err(e) => tracing::error!(?kind, error = %e, "broadcast failed"),
        }
        result
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let result = self.inner.recv().await;
        match &result {
            Ok(frame) => tracing::trace!(
                object = %frame.header.object,
                sender = %frame.header.sender,
                kind = ?frame.header.kind,
                "received"
            ),
            Err(TransportError::Closed) => tracing::debug!("receive on closed transport"),
            Err(e) => tracing::warn!(error = %e, "receive failed"),
        }
        result
    }

    fn close(&self) {
        tracing::info!(local = %self.inner.local_peer(), "closing transport");
        self.inner.close();
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
