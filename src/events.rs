// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle events (§6), expressed as a tagged variant plus a broadcaster
//! rather than an ad-hoc emitter (Design Notes: "Event emitter lifecycle").

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::InitializerError;

/// A lifecycle signal emitted at-most-once per instance (§6).
#[derive(Debug, Clone)]
pub enum Event {
    BucketsSetupDone,
    BucketsReindexDone,
    DataMigrationsDone,
    Done,
    /// Carries the terminal error; no further events follow one of these.
    Error(Arc<InitializerError>),
}

/// Broadcasts [`Event`]s to any number of subscribers. Built on
/// `tokio::sync::broadcast`, so a subscriber that isn't listening yet when an
/// event fires simply misses it -- callers that need the full history should
/// pair this with `Initializer::status()`.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // No subscribers is not an error: status() remains the source of
        // truth for anyone who wasn't listening.
        let _ = self.tx.send(event);
    }
}
