// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data migrations: an ordered, per-model sequence of pure record
//! transforms (§3, §4.5, §4.6).

pub mod controller;
pub mod loader;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::client::StoredRecord;

/// Context passed to a migration function alongside the record (§3).
pub struct MigrateCtx<'a> {
    pub log: &'a slog::Logger,
}

/// A single migration step: `migrate` is applied to every record selected
/// for this version (§4.6). Returning `None` means "already migrated, skip"
/// (§9: "treat falsy return as skip").
pub type MigrateFn = Arc<dyn Fn(&StoredRecord, &MigrateCtx<'_>) -> Option<Value> + Send + Sync>;

/// A registered migration for one model, at one version.
#[derive(Clone)]
pub struct MigrationStep {
    pub version: u32,
    pub migrate: MigrateFn,
}

/// The ordered sequence of migrations for a single model: versions
/// 1, 2, ..., k with no gaps (§3).
#[derive(Clone, Default)]
pub struct ModelMigrations(pub Vec<MigrationStep>);

impl ModelMigrations {
    pub fn highest_version(&self) -> Option<u32> {
        self.0.last().map(|s| s.version)
    }
}

/// The full migration plan: model name -> its ordered migrations (§3).
#[derive(Clone, Default)]
pub struct MigrationPlan(pub BTreeMap<String, ModelMigrations>);

impl MigrationPlan {
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn get(&self, model: &str) -> Option<&ModelMigrations> {
        self.0.get(model)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A host-supplied mapping from `(model, slug)` to the behavior a
/// directory-discovered migration file should run (§4.5: this crate has no
/// dynamic code loading, so the filesystem pins ordering/naming while this
/// registry supplies the executable behavior).
#[derive(Clone, Default)]
pub struct MigrationRegistry(BTreeMap<(String, String), MigrateFn>);

impl MigrationRegistry {
    pub fn new() -> Self {
        MigrationRegistry(BTreeMap::new())
    }

    pub fn register(&mut self, model: impl Into<String>, slug: impl Into<String>, f: MigrateFn) -> &mut Self {
        self.0.insert((model.into(), slug.into()), f);
        self
    }

    pub fn get(&self, model: &str, slug: &str) -> Option<&MigrateFn> {
        self.0.get(&(model.to_string(), slug.to_string()))
    }
}
