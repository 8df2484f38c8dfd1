// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Migration Controller (§4.6): drives all configured models' migrations in
//! parallel, each sequentially through its versions, in bounded chunks.
//!
//! Grounded on the teacher's background-task shape
//! (`nexus/src/app/background/tasks/region_replacement.rs`): a unit of work
//! that degrades a remote failure into a recorded status value rather than
//! panicking, fanned out here one `tokio::spawn`ed task per model to match
//! the teacher workspace's multi-threaded Tokio default (§5).

use std::sync::Arc;
use std::time::Duration;

use slog::{debug, info, o, warn, Logger};

use crate::cancel::CancelToken;
use crate::classify::{self, Phase};
use crate::client::{BatchOp, Filter, MorayClient};
use crate::clock::Clock;
use crate::config::BucketsConfig;
use crate::error::{MigrationError, MorayError, MorayErrorKind};
use crate::status::SharedStatus;

use super::{MigrateCtx, MigrationPlan, ModelMigrations};

/// Remote's default page size for `findObjects` (§4.6); the controller does
/// not override it.
pub const PAGE_SIZE: u32 = 1000;

/// Fixed delay between stale-cache selection retries (§4.6).
pub const STALE_CACHE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default wall-clock budget for the stale-cache retry loop (§4.6: "at
/// least 6 minutes").
pub const DEFAULT_STALE_CACHE_BUDGET: Duration = Duration::from_secs(6 * 60);

/// Tunable knobs threaded through from the Initializer's construction
/// options; kept as one struct so adding a knob doesn't change every call
/// site's argument list.
#[derive(Clone)]
pub struct ControllerOptions {
    pub stale_cache_retry_delay: Duration,
    pub stale_cache_budget: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            stale_cache_retry_delay: STALE_CACHE_RETRY_DELAY,
            stale_cache_budget: DEFAULT_STALE_CACHE_BUDGET,
        }
    }
}

/// Runs every model's migrations to completion, in parallel, and waits for
/// all of them (§4.6, §5).
///
/// A single error is returned to the caller if any model's worker failed;
/// per §4.6 this does not undo the models that succeeded, and their
/// `status.completed` entries remain recorded. The caller (the Orchestrator,
/// via the Backoff Runner) is responsible for re-running this whole
/// function on a transient error -- already-migrated records are skipped
/// naturally by the version-based selection filter, which is what makes
/// that restart safe.
pub async fn run_all(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    clock: &Arc<dyn Clock>,
    config: &Arc<BucketsConfig>,
    plan: &Arc<MigrationPlan>,
    status: &Arc<SharedStatus>,
    cancel: &CancelToken,
    options: &ControllerOptions,
) -> Result<(), MigrationError> {
    let mut handles = Vec::new();
    for model in plan.models() {
        let model = model.to_string();
        let Some(spec) = config.get(&model) else {
            // Already validated at construction (§4.9); defensive.
            continue;
        };
        let bucket_name = spec.name.clone();
        let migrations = plan.get(&model).cloned().unwrap_or_default();
        let log = log.new(o!("model" => model.clone()));
        let client = Arc::clone(client);
        let clock = Arc::clone(clock);
        let status = Arc::clone(status);
        let cancel = cancel.clone();
        let options = options.clone();

        handles.push(tokio::spawn(async move {
            let result = run_model(
                &log, &client, &clock, &model, &bucket_name, &migrations, &status, &cancel, &options,
            )
            .await;
            (model, result)
        }));
    }

    let mut first_error = None;
    for handle in handles {
        let (model, result) = handle.await.expect("migration worker task panicked");
        match result {
            Ok(()) => {}
            Err(err) => {
                status.update(|s| {
                    s.data_migrations.latest_errors.insert(model.clone(), err.to_string());
                });
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_model(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    clock: &Arc<dyn Clock>,
    model: &str,
    bucket_name: &str,
    migrations: &ModelMigrations,
    status: &Arc<SharedStatus>,
    cancel: &CancelToken,
    options: &ControllerOptions,
) -> Result<(), MigrationError> {
    for step in &migrations.0 {
        if cancel.is_cancelled() {
            return Err(MigrationError::Remote {
                model: model.to_string(),
                source: MorayError::generic("cancelled"),
            });
        }
        run_single_migration(log, client, clock, model, bucket_name, step.version, &step.migrate, status, cancel, options)
            .await
            .map_err(|source| MigrationError::Remote { model: model.to_string(), source })?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_single_migration(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    clock: &Arc<dyn Clock>,
    model: &str,
    bucket_name: &str,
    version: u32,
    migrate: &super::MigrateFn,
    status: &Arc<SharedStatus>,
    cancel: &CancelToken,
    options: &ControllerOptions,
) -> Result<(), MorayError> {
    let filter =
        if version == 1 { Filter::missing_data_version() } else { Filter::data_version_eq_or_missing(version - 1) };

    info!(log, "starting migration"; "version" => version);

    loop {
        if cancel.is_cancelled() {
            return Err(MorayError::generic("cancelled"));
        }

        let page = select_with_stale_cache_retry(log, client, clock, bucket_name, &filter, options).await?;

        if page.is_empty() {
            status.update(|s| {
                s.data_migrations.completed.insert(model.to_string(), version);
            });
            info!(log, "migration complete"; "version" => version);
            return Ok(());
        }

        let ctx = MigrateCtx { log };
        let mut ops = Vec::with_capacity(page.len());
        for record in &page {
            if let Some(new_value) = migrate(record, &ctx) {
                ops.push(BatchOp {
                    bucket: bucket_name.to_string(),
                    key: record.key.clone(),
                    value: new_value,
                    etag: record.etag.clone(),
                });
            }
        }

        debug!(log, "migrating chunk"; "version" => version, "records" => page.len(), "writes" => ops.len());

        if !ops.is_empty() {
            client.batch(ops).await?;
        }

        // Yield so sibling model workers interleave (§4.6 step 5, §5).
        tokio::task::yield_now().await;
    }
}

async fn select_with_stale_cache_retry(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    clock: &Arc<dyn Clock>,
    bucket_name: &str,
    filter: &Filter,
    options: &ControllerOptions,
) -> Result<Vec<crate::client::StoredRecord>, MorayError> {
    let deadline = clock.now() + options.stale_cache_budget;
    loop {
        match client.find_objects(bucket_name, filter, PAGE_SIZE).await {
            Ok(records) => return Ok(records),
            Err(e) if e.chain_has_kind(MorayErrorKind::InvalidQueryError) => {
                if clock.now() >= deadline {
                    warn!(log, "stale schema cache retry budget exhausted");
                    return Err(e);
                }
                warn!(log, "selection query rejected, schema cache likely stale, retrying";
                    "delay_s" => options.stale_cache_retry_delay.as_secs());
                clock.sleep(options.stale_cache_retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// True if `err` (already wrapped as a [`MigrationError`]) should abort the
/// data-migration phase rather than be retried by the Backoff Runner.
pub fn is_terminal_migration_error(err: &MigrationError) -> bool {
    match err {
        MigrationError::Remote { source, .. } => classify::is_terminal(Phase::DataMigration, source),
    }
}

