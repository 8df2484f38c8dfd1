// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The capability interface this crate needs from a remote storage service.
//!
//! Production code depends only on [`MorayClient`]; no test ever monkeys
//! with a concrete client type. A fake implementation lives in
//! [`crate::testing`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MorayError;

/// A field type as declared in a bucket's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Options attached to a bucket schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SchemaOptions {
    #[serde(default)]
    pub version: u32,
}

/// A bucket schema: the indexed fields and version/hooks metadata.
///
/// `pre`/`post` are opaque to the core (§3) and passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BucketSchema {
    pub index: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub options: SchemaOptions,
    #[serde(default)]
    pub pre: Vec<Value>,
    #[serde(default)]
    pub post: Vec<Value>,
}

/// The bucket record as returned by `getBucket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBucket {
    pub name: String,
    pub index: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub options: SchemaOptions,
    #[serde(default)]
    pub pre: Vec<Value>,
    #[serde(default)]
    pub post: Vec<Value>,
    /// Non-empty while the remote is still reindexing this bucket in the
    /// background.
    #[serde(default)]
    pub reindex_active: BTreeMap<String, Value>,
    /// The remote's per-row schema-version tag. Observed, never written.
    pub rver: u32,
}

impl RemoteBucket {
    pub fn schema(&self) -> BucketSchema {
        BucketSchema {
            index: self.index.clone(),
            options: self.options.clone(),
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

/// A record as read back from `findObjects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    pub etag: String,
}

/// The result of a `reindexObjects` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexResult {
    pub processed: u32,
}

/// A single operation in a `batch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOp {
    pub bucket: String,
    pub key: String,
    pub value: Value,
    pub etag: String,
}

/// A query filter for `findObjects`.
///
/// Opaque to the core beyond the three constructors below; the remote
/// interprets the LDAP-ish filter language, which this crate does not
/// otherwise model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(pub String);

impl Filter {
    /// `V == 1`: records with no `data_version` field at all.
    pub fn missing_data_version() -> Self {
        Filter("!(data_version=*)".to_string())
    }

    /// `V > 1`: records at exactly `prev_version`, or (defensively) records
    /// that slipped behind without a `data_version` at all.
    pub fn data_version_eq_or_missing(prev_version: u32) -> Self {
        Filter(format!("(|(!(data_version=*))(data_version={prev_version}))"))
    }
}

/// The minimal capability interface the core consumes from a remote
/// key-value/indexing service (§6).
#[async_trait]
pub trait MorayClient: Send + Sync {
    async fn get_bucket(&self, name: &str) -> Result<RemoteBucket, MorayError>;

    async fn create_bucket(&self, name: &str, schema: &BucketSchema) -> Result<(), MorayError>;

    async fn update_bucket(&self, name: &str, schema: &BucketSchema) -> Result<(), MorayError>;

    async fn reindex_objects(&self, name: &str, count: u32) -> Result<ReindexResult, MorayError>;

    /// Returns up to `limit` records matching `filter`. An empty result
    /// means the query is exhausted (§4.6 relies on this rather than a
    /// cursor/token, since the filter itself excludes already-migrated rows).
    async fn find_objects(
        &self,
        bucket: &str,
        filter: &Filter,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, MorayError>;

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), MorayError>;
}
