// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Initializer (Orchestrator) (§4.7): sequences the three phases and
//! exposes status and lifecycle events.
//!
//! Grounded in shape on the teacher's `ensure_schema`
//! (`nexus/db-queries/src/db/datastore/db_metadata.rs`): a single top-level
//! async method that reads current state, decides what (if anything) needs
//! doing, and reports success or a string/error outward -- generalized here
//! into three phases, each wrapped by the Backoff Runner, with every
//! transition published to a [`SharedStatus`] and an [`EventBus`] instead of
//! returned directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camino::Utf8PathBuf;
use slog::{error, info, o, Logger};

use crate::backoff_runner::{self, RunOutcome};
use crate::cancel::CancelToken;
use crate::client::MorayClient;
use crate::clock::{Clock, SystemClock};
use crate::config::BucketsConfig;
use crate::error::InitializerError;
use crate::events::{Event, EventBus};
use crate::migration::controller::{self, ControllerOptions};
use crate::migration::loader;
use crate::migration::{MigrationPlan, MigrationRegistry};
use crate::reindex;
use crate::schema;
use crate::status::{PhaseState, SharedStatus, Status};

/// Where the data migration plan comes from (§6: "dataMigrationsPath OR a
/// pre-loaded migration plan").
pub enum DataMigrationsSource {
    /// No data migrations are configured; the migration phase stays
    /// `NOT_STARTED` forever and the Initializer still reaches `DONE`
    /// (§4.7).
    None,
    /// Load and validate a plan from a directory at construction time
    /// (§4.5).
    Path { root: Utf8PathBuf, registry: MigrationRegistry },
    /// A plan a caller already loaded and validated (e.g. to reuse across
    /// instances in tests).
    Plan(MigrationPlan),
}

/// Optional per-phase attempt caps (§6) and migration-controller tuning.
#[derive(Default, Clone)]
pub struct InitializerOptions {
    pub max_buckets_setup_attempts: Option<u32>,
    pub max_buckets_reindex_attempts: Option<u32>,
    pub max_data_migrations_attempts: Option<u32>,
    pub controller: ControllerOptions,
    /// Overrides the clock; production callers should leave this `None` and
    /// get [`SystemClock`]. Tests inject a `ManualClock`
    /// (see [`crate::testing`]).
    pub clock: Option<Arc<dyn Clock>>,
}

/// The coordinator described in §4.7. Construct with [`Initializer::new`],
/// then call [`Initializer::start`] from behind an `Arc`.
pub struct Initializer {
    log: Logger,
    client: Arc<dyn MorayClient>,
    clock: Arc<dyn Clock>,
    config: Arc<BucketsConfig>,
    plan: Arc<MigrationPlan>,
    has_plan: bool,
    status: Arc<SharedStatus>,
    events: EventBus,
    cancel: CancelToken,
    options: InitializerOptions,
    started: AtomicBool,
}

impl Initializer {
    /// Validates `config` and (if present) the migration plan, then
    /// constructs an Initializer. Both validators run here, unified,
    /// instead of at separate call sites (§4.9, DESIGN.md Open Question
    /// resolution #3): a malformed configuration fails before `start()` is
    /// ever called.
    pub async fn new(
        log: Logger,
        client: Arc<dyn MorayClient>,
        config: BucketsConfig,
        data_migrations: DataMigrationsSource,
        options: InitializerOptions,
    ) -> Result<Self, InitializerError> {
        let (plan, has_plan) = match data_migrations {
            DataMigrationsSource::None => (MigrationPlan::default(), false),
            DataMigrationsSource::Path { root, registry } => {
                // `load_plan` validates config+plan together; run the
                // config-only validation first so config-only problems
                // (e.g. duplicate bucket names) aren't masked.
                config.validate(None).map_err(InitializerError::from_config_errors)?;
                let plan = loader::load_plan(&root, &config, &registry).await?;
                (plan, true)
            }
            DataMigrationsSource::Plan(plan) => {
                config.validate(Some(&plan)).map_err(InitializerError::from_config_errors)?;
                (plan, true)
            }
        };

        let clock = options.clock.clone().unwrap_or_else(|| Arc::new(SystemClock));

        Ok(Initializer {
            log,
            client,
            clock,
            config: Arc::new(config),
            plan: Arc::new(plan),
            has_plan,
            status: Arc::new(SharedStatus::new()),
            events: EventBus::new(),
            cancel: CancelToken::new(),
            options,
            started: AtomicBool::new(false),
        })
    }

    /// Returns a deep-copy snapshot of the current Status Model (§3, §6).
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    /// Subscribes to lifecycle events (§6).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Requests cancellation; in-flight backoff waits and the migration
    /// chunk loop observe this promptly (§5).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Begins the pipeline. Not re-entrant: a second call returns
    /// [`InitializerError::AlreadyStarted`] immediately (§4.7).
    ///
    /// Runs to completion and returns the terminal result; callers that want
    /// to observe progress concurrently should poll [`Initializer::status`]
    /// or [`Initializer::subscribe`] from another task while awaiting this
    /// one (or spawn this future themselves).
    pub async fn start(self: &Arc<Self>) -> Result<(), Arc<InitializerError>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Arc::new(InitializerError::AlreadyStarted));
        }

        let result = self.run_pipeline().await;
        match result {
            Ok(()) => {
                info!(self.log, "buckets initializer done");
                self.events.emit(Event::Done);
                Ok(())
            }
            Err(e) => {
                error!(self.log, "buckets initializer failed"; "error" => %e);
                let err = Arc::new(e);
                self.events.emit(Event::Error(Arc::clone(&err)));
                Err(err)
            }
        }
    }

    async fn run_pipeline(self: &Arc<Self>) -> Result<(), InitializerError> {
        self.run_buckets_setup().await?;
        self.events.emit(Event::BucketsSetupDone);

        self.run_buckets_reindex().await?;
        self.events.emit(Event::BucketsReindexDone);

        if self.has_plan {
            self.run_data_migrations().await?;
            self.events.emit(Event::DataMigrationsDone);
        }

        Ok(())
    }

    async fn run_buckets_setup(self: &Arc<Self>) -> Result<(), InitializerError> {
        let log = self.log.new(o!("phase" => "buckets_setup"));
        self.status.update(|s| s.buckets_setup.state = PhaseState::Started);

        let specs: Vec<_> = self.config.iter().map(|(_, spec)| spec.clone()).collect();
        let result = backoff_runner::run(
            &log,
            &self.clock,
            "buckets_setup",
            self.options.max_buckets_setup_attempts,
            &self.cancel,
            || {
                let client = Arc::clone(&self.client);
                let log = log.clone();
                let specs = specs.clone();
                async move { schema::reconcile_all(&log, &client, specs.iter()).await }
            },
            |e| !schema::is_terminal_schema_error(e),
            |e| self.status.update(|s| s.buckets_setup.latest_error = Some(e.to_string())),
        )
        .await;

        match result {
            Ok(()) => {
                self.status.update(|s| {
                    s.buckets_setup.state = PhaseState::Done;
                    s.buckets_setup.latest_error = None;
                });
                Ok(())
            }
            Err(outcome) => {
                let err = self.phase_outcome_to_error(outcome, "buckets_setup", |e| InitializerError::Schema(e));
                self.status.update(|s| {
                    s.buckets_setup.state = PhaseState::Error;
                    s.buckets_setup.latest_error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    async fn run_buckets_reindex(self: &Arc<Self>) -> Result<(), InitializerError> {
        let log = self.log.new(o!("phase" => "buckets_reindex"));
        self.status.update(|s| s.buckets_reindex.state = PhaseState::Started);

        let bucket_names: Vec<String> = self.config.iter().map(|(_, spec)| spec.name.clone()).collect();
        let result = backoff_runner::run(
            &log,
            &self.clock,
            "buckets_reindex",
            self.options.max_buckets_reindex_attempts,
            &self.cancel,
            || {
                let client = Arc::clone(&self.client);
                let log = log.clone();
                let bucket_names = bucket_names.clone();
                async move { reindex::reindex_all(&log, &client, bucket_names.iter().map(|s| s.as_str())).await }
            },
            // All reindex errors are transient (§4.4).
            |_e| true,
            |e| self.status.update(|s| s.buckets_reindex.latest_error = Some(e.to_string())),
        )
        .await;

        match result {
            Ok(()) => {
                self.status.update(|s| {
                    s.buckets_reindex.state = PhaseState::Done;
                    s.buckets_reindex.latest_error = None;
                });
                Ok(())
            }
            Err(outcome) => {
                let err = self.phase_outcome_to_error(outcome, "buckets_reindex", InitializerError::Reindex);
                self.status.update(|s| {
                    s.buckets_reindex.state = PhaseState::Error;
                    s.buckets_reindex.latest_error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    async fn run_data_migrations(self: &Arc<Self>) -> Result<(), InitializerError> {
        let log = self.log.new(o!("phase" => "data_migrations"));
        self.status.update(|s| s.data_migrations.state = PhaseState::Started);

        let result = backoff_runner::run(
            &log,
            &self.clock,
            "data_migrations",
            self.options.max_data_migrations_attempts,
            &self.cancel,
            || {
                let client = Arc::clone(&self.client);
                let clock = Arc::clone(&self.clock);
                let config = Arc::clone(&self.config);
                let plan = Arc::clone(&self.plan);
                let status = Arc::clone(&self.status);
                let cancel = self.cancel.clone();
                let controller_options = self.options.controller.clone();
                let log = log.clone();
                async move {
                    controller::run_all(&log, &client, &clock, &config, &plan, &status, &cancel, &controller_options)
                        .await
                }
            },
            |e| !controller::is_terminal_migration_error(e),
            |_e| {
                // Per-model errors already landed in
                // `status.data_migrations.latest_errors`; there is no
                // single phase-wide `latestError` field to update here.
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.status.update(|s| s.data_migrations.state = PhaseState::Done);
                Ok(())
            }
            Err(outcome) => {
                let err = self.phase_outcome_to_error(outcome, "data_migrations", InitializerError::Migration);
                self.status.update(|s| s.data_migrations.state = PhaseState::Error);
                Err(err)
            }
        }
    }

    fn phase_outcome_to_error<E>(
        &self,
        outcome: RunOutcome<E>,
        phase: &'static str,
        to_initializer_error: impl FnOnce(E) -> InitializerError,
    ) -> InitializerError {
        match outcome {
            RunOutcome::Terminal(e) => to_initializer_error(e),
            RunOutcome::MaxAttemptsReached => InitializerError::MaxAttemptsReached { phase },
            RunOutcome::Cancelled => InitializerError::Cancelled { phase },
        }
    }
}
