// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema Reconciler (§4.3): for each bucket, load the current remote
//! schema, create or update it to the desired schema, and reject illegal
//! changes.
//!
//! Grounded on the teacher's `ensure_schema`
//! (`nexus/db-queries/src/db/datastore/db_metadata.rs`): load current state,
//! compare against desired, and either no-op, create, or apply a single
//! staged change -- restated here against a bucket's `(index, version)` pair
//! instead of a CockroachDB DDL sequence.

use std::collections::BTreeSet;
use std::sync::Arc;

use slog::{info, o, warn, Logger};

use crate::classify::{self, Phase};
use crate::client::{BucketSchema, MorayClient};
use crate::config::BucketSpec;
use crate::error::{MorayErrorKind, SchemaError};

/// Reconciles a single bucket against its desired spec. Returns `Ok(())`
/// once the bucket matches (or legally supersedes) the desired schema.
///
/// Any error returned here has already been classified: callers (the
/// Backoff Runner) just need `classify::is_transient(Phase::BucketsSetup,
/// ..)`-shaped decisions, which is why this function returns a
/// [`MorayError`] on the remote-originated paths and a [`SchemaError`] on
/// the core-originated ones, unified by the caller.
pub async fn reconcile_bucket(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    spec: &BucketSpec,
) -> Result<(), SchemaError> {
    let log = log.new(o!("bucket" => spec.name.clone()));

    let current = match client.get_bucket(&spec.name).await {
        Ok(bucket) => Some(bucket),
        Err(e) if e.chain_has_kind(MorayErrorKind::BucketNotFoundError) => None,
        Err(e) => return Err(SchemaError::Remote { bucket: spec.name.clone(), source: e }),
    };

    let Some(current) = current else {
        info!(log, "bucket does not exist, creating");
        client
            .create_bucket(&spec.name, &spec.schema)
            .await
            .map_err(|e| SchemaError::Remote { bucket: spec.name.clone(), source: e })?;
        return Ok(());
    };

    let old_version = current.options.version;
    let new_version = spec.schema.options.version;
    let old_schema = current.schema();

    match new_version.cmp(&old_version) {
        std::cmp::Ordering::Equal => {
            if schemas_structurally_equal(&old_schema, &spec.schema) {
                Ok(())
            } else {
                warn!(log, "schema changed without a version bump");
                Err(SchemaError::SchemaChangesSameVersion { bucket: spec.name.clone() })
            }
        }
        std::cmp::Ordering::Greater => {
            let removed: Vec<String> = old_schema
                .index
                .keys()
                .collect::<BTreeSet<_>>()
                .difference(&spec.schema.index.keys().collect::<BTreeSet<_>>())
                .map(|s| s.to_string())
                .collect();
            if !removed.is_empty() {
                warn!(log, "desired schema removes indexes"; "removed" => ?removed);
                return Err(SchemaError::InvalidIndexesRemoval { bucket: spec.name.clone(), removed });
            }
            info!(log, "updating bucket schema";
                "old_version" => old_version, "new_version" => new_version);
            client
                .update_bucket(&spec.name, &spec.schema)
                .await
                .map_err(|e| SchemaError::Remote { bucket: spec.name.clone(), source: e })
        }
        std::cmp::Ordering::Less => {
            // Code rollback: the remote already holds the superset schema.
            // §4.3 rationale: downgrades must never mutate the remote,
            // because a future forward roll could then find a removed
            // index unindexed.
            info!(log, "desired version is behind remote, no-op";
                "old_version" => old_version, "new_version" => new_version);
            Ok(())
        }
    }
}

/// Structural equality after normalizing both schemas per §4.3: defaults
/// filled in, remote-only fields dropped. `BucketSchema` never carries
/// `name`/`mtime` in this crate's model (those live only on
/// [`crate::client::RemoteBucket`]), so normalization here is just
/// confirming the index/options/pre/post fields match field-for-field.
fn schemas_structurally_equal(a: &BucketSchema, b: &BucketSchema) -> bool {
    a.index == b.index && a.options.version == b.options.version && a.pre == b.pre && a.post == b.post
}

/// Reconciles every bucket in turn, sequentially (§4.3, §5): the first
/// terminal error stops the pass.
pub async fn reconcile_all(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    specs: impl Iterator<Item = &BucketSpec>,
) -> Result<(), SchemaError> {
    for spec in specs {
        reconcile_bucket(log, client, spec).await?;
    }
    Ok(())
}

/// True if `err` should abort the whole setup phase rather than retry.
pub fn is_terminal_schema_error(err: &SchemaError) -> bool {
    match err {
        SchemaError::SchemaChangesSameVersion { .. } => true,
        SchemaError::InvalidIndexesRemoval { .. } => true,
        SchemaError::Remote { source, .. } => classify::is_terminal(Phase::BucketsSetup, source),
    }
}

