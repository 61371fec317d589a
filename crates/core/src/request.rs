// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer identifiers and totally ordered requests
//!
//! A [`Request`] is one pending lock acquisition or condition wait. Requests
//! order by logical timestamp first and peer id second, so no two requests
//! in the cluster ever compare equal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable identifier of one participating process
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A pending acquisition, ordered by `(priority, host)`
///
/// Field order matters: the derived `Ord` compares `priority` before `host`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Request {
    pub priority: u64,
    pub host: PeerId,
}

impl Request {
    pub fn new(priority: u64, host: PeerId) -> Self {
        Self { priority, host }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.priority)
    }
}

/// Priority queue of requests, replicated independently on every peer
#[derive(Clone, Debug, Default)]
pub struct RequestQueue {
    requests: BTreeSet<Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request; returns false if it was already queued
    pub fn push(&mut self, request: Request) -> bool {
        self.requests.insert(request)
    }

    /// The smallest request, if any
    pub fn head(&self) -> Option<&Request> {
        self.requests.first()
    }

    pub fn pop_head(&mut self) -> Option<Request> {
        self.requests.pop_first()
    }

    /// Remove the earliest request issued by `peer`
    pub fn remove_first_from(&mut self, peer: &PeerId) -> Option<Request> {
        let found = self.requests.iter().find(|r| &r.host == peer).cloned()?;
        self.requests.remove(&found);
        Some(found)
    }

    pub fn remove(&mut self, request: &Request) -> bool {
        self.requests.remove(request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }
}

impl fmt::Display for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, request) in self.requests.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{request}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
