// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster membership and transport settings
//!
//! ```toml
//! peers = ["127.0.0.1:5001", "127.0.0.1:5002"]
//! connect_retry = "250ms"
//! ```

use crate::message::DEFAULT_MAX_FRAME_LEN;
use crate::request::PeerId;
use crate::transport::TcpOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Overrides `connect_retry`, in milliseconds
pub const CONNECT_RETRY_ENV: &str = "DM_CONNECT_RETRY_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("peer list is empty")]
    NoPeers,
    #[error("peer {0} is listed more than once")]
    DuplicatePeer(PeerId),
    #[error("local peer {0} is not in the peer list")]
    UnknownLocalPeer(PeerId),
}

/// The fixed peer set and how to reach it
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Every member, including the local peer, as `host:port`
    pub peers: Vec<PeerId>,
    /// Delay between attempts to reach a peer that is not listening yet
    #[serde(with = "humantime_serde", default = "default_connect_retry")]
    pub connect_retry: Duration,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_connect_retry() -> Duration {
    Duration::from_millis(100)
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl ClusterConfig {
    pub fn new(peers: Vec<PeerId>) -> Self {
        Self {
            peers,
            connect_retry: default_connect_retry(),
            max_frame_len: default_max_frame_len(),
        }
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(retry) = parse_duration_ms(CONNECT_RETRY_ENV) {
            self.connect_retry = retry;
        }
        self
    }

    /// Split the peer list into the local peer and its remotes
    pub fn for_peer(&self, local: &PeerId) -> Result<(PeerId, Vec<PeerId>), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::NoPeers);
        }
        for (i, peer) in self.peers.iter().enumerate() {
            if self.peers[..i].contains(peer) {
                return Err(ConfigError::DuplicatePeer(peer.clone()));
            }
        }
        if !self.peers.contains(local) {
            return Err(ConfigError::UnknownLocalPeer(local.clone()));
        }

        let remotes = self.peers.iter().filter(|p| *p != local).cloned().collect();
        Ok((local.clone(), remotes))
    }

    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            connect_retry: self.connect_retry,
            max_frame_len: self.max_frame_len,
        }
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
