// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded buffer shared by producers and consumers on different peers

use crate::condition::DistributedCondition;
use crate::error::MonitorError;
use crate::messenger::Messenger;
use crate::monitor::{Monitor, StateCodec};
use tracing::debug;

/// A LIFO stack of at most `capacity` values replicated by a monitor
pub struct BoundedBuffer {
    monitor: Monitor<Vec<i64>>,
    full: DistributedCondition,
    empty: DistributedCondition,
    capacity: usize,
}

impl BoundedBuffer {
    /// Register the `"buffer"` monitor; a zero capacity could never accept a value
    pub fn new(capacity: usize, messenger: &Messenger) -> Result<Self, MonitorError> {
        if capacity == 0 {
            return Err(MonitorError::ZeroCapacity);
        }
        let monitor = Monitor::new("buffer", messenger, Vec::new(), StateCodec::json())?;
        let full = monitor.condition("full")?;
        let empty = monitor.condition("empty")?;
        Ok(Self {
            monitor,
            full,
            empty,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push `value`, waiting while the buffer is full
    pub async fn produce(&self, value: i64) -> Result<(), MonitorError> {
        let (full, empty, capacity) = (&self.full, &self.empty, self.capacity);
        self.monitor
            .entry(|state| async move {
                while state.read(|s| s.len()) >= capacity {
                    full.wait().await?;
                }
                let len = state.update(|s| {
                    s.push(value);
                    s.len()
                });
                debug!(value, len, "produced");
                if len == 1 {
                    empty.signal()?;
                }
                Ok(())
            })
            .await
    }

    /// Pop the most recent value, waiting while the buffer is empty
    pub async fn consume(&self) -> Result<i64, MonitorError> {
        let (full, empty, capacity) = (&self.full, &self.empty, self.capacity);
        self.monitor
            .entry(|state| async move {
                loop {
                    if let Some(value) = state.update(|s| s.pop()) {
                        let len = state.read(|s| s.len());
                        debug!(value, len, "consumed");
                        if len + 1 == capacity {
                            full.signal()?;
                        }
                        return Ok(value);
                    }
                    empty.wait().await?;
                }
            })
            .await
    }

    /// Local replica of the buffer contents
    pub fn snapshot(&self) -> Vec<i64> {
        self.monitor.snapshot()
    }

    pub fn close(&self) {
        self.monitor.close();
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
