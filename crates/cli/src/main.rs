// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dmon - one peer of a distributed bounded buffer

mod cluster;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{consume, produce};
use dm_core::BoundedBuffer;
use std::time::Duration;
use tracing::info;

use crate::cluster::ClusterArgs;

#[derive(Parser)]
#[command(
    name = "dmon",
    version,
    about = "Distributed monitor demo - a bounded buffer shared over TCP"
)]
struct Cli {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Buffer capacity
    #[arg(long, global = true, default_value_t = 1)]
    capacity: usize,

    /// Keep serving lock traffic this long after finishing (ms)
    #[arg(long, global = true, default_value_t = 2000)]
    linger_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push values into the buffer
    Produce(produce::ProduceArgs),
    /// Pop values from the buffer
    Consume(consume::ConsumeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        cluster,
        capacity,
        linger_ms,
        command,
    } = Cli::parse();
    setup_logging();

    if capacity == 0 {
        anyhow::bail!("--capacity must be at least 1");
    }

    let messenger = cluster.connect().await?;
    let buffer = BoundedBuffer::new(capacity, &messenger)?;
    let receiver = messenger.start();

    let work = async {
        match command {
            Commands::Produce(args) => produce::produce(&buffer, args).await,
            Commands::Consume(args) => consume::consume(&buffer, args).await,
        }
    };
    tokio::select! {
        result = work => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            buffer.close();
            return Ok(());
        }
    }

    // Peers still queued for the lock need our RESPONSE and RELEASE messages
    tokio::time::sleep(Duration::from_millis(linger_ms)).await;
    buffer.close();
    let _ = receiver.await;
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the produced/consumed values
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
