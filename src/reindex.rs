// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reindex Driver (§4.4): repeatedly asks the remote to reindex a bounded
//! page of a bucket until none remain. All errors here are transient -- the
//! operation is inherently retryable and the caller (the Backoff Runner)
//! wraps each call, not the whole loop.

use std::sync::Arc;

use slog::{debug, info, o, Logger};

use crate::client::MorayClient;
use crate::error::MorayError;

/// Number of records the remote is asked to reindex per call (§4.4).
pub const REINDEX_PAGE_SIZE: u32 = 100;

/// Drives a single bucket's reindex to completion.
pub async fn reindex_bucket(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    bucket_name: &str,
) -> Result<(), MorayError> {
    let log = log.new(o!("bucket" => bucket_name.to_string()));
    loop {
        let result = client.reindex_objects(bucket_name, REINDEX_PAGE_SIZE).await?;
        debug!(log, "reindexed page"; "processed" => result.processed);
        if result.processed == 0 {
            info!(log, "reindex complete");
            return Ok(());
        }
    }
}

/// Drives reindex for every bucket in turn.
pub async fn reindex_all<'a>(
    log: &Logger,
    client: &Arc<dyn MorayClient>,
    bucket_names: impl Iterator<Item = &'a str>,
) -> Result<(), MorayError> {
    for name in bucket_names {
        reindex_bucket(log, client, name).await?;
    }
    Ok(())
}
