// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status Model (§3): a sealed, per-phase status rather than a loose
//! dictionary (Design Notes: "Model Status as a sealed variant per phase").

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

/// Status of a phase that fails as a single unit (buckets setup, reindex).
#[derive(Debug, Clone, Serialize, Default)]
pub struct PhaseStatus {
    pub state: PhaseState,
    pub latest_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    NotStarted,
    Started,
    Done,
    Error,
}

impl Default for PhaseState {
    fn default() -> Self {
        PhaseState::NotStarted
    }
}

/// Status of the data-migration phase, which fails (or succeeds) per model.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DataMigrationsStatus {
    pub state: PhaseState,
    pub latest_errors: BTreeMap<String, String>,
    pub completed: BTreeMap<String, u32>,
}

/// A deep-copy snapshot of the whole Status Model, returned by value from
/// `Initializer::status()` (§3: "returned by value (deep copy)").
#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub buckets_setup: PhaseStatus,
    pub buckets_reindex: PhaseStatus,
    pub data_migrations: DataMigrationsStatus,
}

/// Interior-mutable holder for the live Status Model. All mutation happens
/// from within the Orchestrator; external observers only ever see snapshots
/// via [`SharedStatus::snapshot`].
#[derive(Default)]
pub struct SharedStatus(Mutex<Status>);

impl SharedStatus {
    pub fn new() -> Self {
        SharedStatus(Mutex::new(Status::default()))
    }

    pub fn snapshot(&self) -> Status {
        self.0.lock().expect("status mutex poisoned").clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Status)) {
        let mut guard = self.0.lock().expect("status mutex poisoned");
        f(&mut guard);
    }
}
