// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dmon produce` - push 1..=N into the shared buffer

use anyhow::Result;
use clap::Args;
use dm_core::BoundedBuffer;

#[derive(Args)]
pub struct ProduceArgs {
    /// Number of values to produce
    #[arg(short = 'n', long, default_value_t = 100)]
    pub items: i64,
}

pub async fn produce(buffer: &BoundedBuffer, args: ProduceArgs) -> Result<()> {
    println!("START producer");
    for value in 1..=args.items {
        buffer.produce(value).await?;
        println!("Produced {value}");
    }
    println!("STOP producer");
    Ok(())
}
