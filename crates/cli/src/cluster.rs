// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster membership from the command line or a config file

use anyhow::{Context, Result};
use clap::Args;
use dm_core::{ClusterConfig, Messenger, PeerId, TcpTransport, TracedTransport, Transport};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ClusterArgs {
    /// Cluster config file (TOML)
    #[arg(long, global = true, conflicts_with = "peers")]
    pub config: Option<PathBuf>,

    /// Every peer's address as host:port, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// This process's own address; must be one of the peers
    #[arg(long, global = true)]
    pub peer: Option<String>,
}

impl ClusterArgs {
    pub fn load(&self) -> Result<ClusterConfig> {
        match &self.config {
            Some(path) => Ok(ClusterConfig::load(path)?),
            None if self.peers.is_empty() => anyhow::bail!("either --config or --peers is required"),
            None => Ok(ClusterConfig::new(self.peers.iter().map(PeerId::new).collect()).with_env_overrides()),
        }
    }

    /// Listen on the local address and wrap the transport in a messenger
    pub async fn connect(&self) -> Result<Messenger> {
        let Some(peer) = &self.peer else {
            anyhow::bail!("--peer is required");
        };
        let config = self.load()?;
        let (local, remotes) = config.for_peer(&PeerId::new(peer.as_str()))?;

        let transport = TcpTransport::bind(local, remotes, config.tcp_options())
            .await
            .with_context(|| format!("failed to listen on {peer}"))?;
        info!(
            peer = %transport.local_peer(),
            addr = %transport.local_addr(),
            remotes = transport.remote_peers().len(),
            "listening"
        );
        Ok(Messenger::new(TracedTransport::new(transport)))
    }
}
