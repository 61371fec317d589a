// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dmon consume` - pop N values from the shared buffer

use anyhow::Result;
use clap::Args;
use dm_core::BoundedBuffer;

#[derive(Args)]
pub struct ConsumeArgs {
    /// Number of values to consume
    #[arg(short = 'n', long, default_value_t = 100)]
    pub items: u64,
}

pub async fn consume(buffer: &BoundedBuffer, args: ConsumeArgs) -> Result<()> {
    println!("START consumer");
    for _ in 0..args.items {
        let value = buffer.consume().await?;
        println!("Consumed {value}");
    }
    println!("STOP consumer");
    Ok(())
}
