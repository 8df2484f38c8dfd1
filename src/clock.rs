// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Injectable time source (Design Notes: "extract a clock").
//!
//! The stale schema-cache retry budget (§4.6) and the Backoff Runner's
//! delays both go through this trait instead of calling `tokio::time`
//! directly, so tests can make a six-minute wall-clock budget resolve
//! instantly.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Total time elapsed since some fixed, implementation-defined origin.
    fn now(&self) -> Duration;

    /// Suspends the caller for `d`.
    async fn sleep(&self, d: Duration);
}

/// The real clock, backed by the Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // Relative to process start; only ever used for measuring elapsed
        // intervals, never rendered or compared across processes.
        static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        let start = *START.get_or_init(std::time::Instant::now);
        start.elapsed()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}
