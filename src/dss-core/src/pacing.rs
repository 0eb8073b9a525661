// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Minimum spacing between consecutive block-memory reads.
//!
//! The device channel drops data when reads are issued back to back, so the
//! fetcher waits at least `interval` after each completed read before the
//! next one starts.

use std::time::Duration;

use tokio::time::{self, Instant};

/// Default gap between reads.
pub const DEFAULT_READ_PACING: Duration = Duration::from_micros(500);

#[derive(Debug, Clone)]
pub struct ReadPacer {
    interval: Duration,
    last_read: Option<Instant>,
}

impl ReadPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_read: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next read is allowed.
    pub async fn ready(&self) {
        if let Some(last) = self.last_read {
            time::sleep_until(last + self.interval).await;
        }
    }

    /// Record that a read just completed.
    pub fn mark(&mut self) {
        self.last_read = Some(Instant::now());
    }
}

impl Default for ReadPacer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_PACING)
    }
}
