// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy consumed by the classifier and surfaced via status.
//!
//! Errors originating from the remote storage service are represented as a
//! chain of [`MorayError`] values, mirroring how the remote actually reports
//! failures: a generic wrapper ("batch failed") whose `source()` may bottom
//! out in a named, well-known kind ("BucketNotFoundError"). The classifier in
//! [`crate::classify`] walks this chain rather than matching only the
//! outermost error.

use std::fmt;

/// The set of named error kinds the core cares about. Anything not listed
/// here is an opaque, presumptively transient remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MorayErrorKind {
    BucketNotFoundError,
    InvalidBucketConfigError,
    InvalidBucketNameError,
    InvalidIndexDefinitionError,
    NotFunctionError,
    BucketVersionError,
    InvalidIndexesRemovalError,
    SchemaChangesSameVersionError,
    InvalidIndexTypeError,
    InvalidQueryError,
    NotIndexedError,
    UniqueAttributeError,
}

impl fmt::Display for MorayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MorayErrorKind::BucketNotFoundError => "BucketNotFoundError",
            MorayErrorKind::InvalidBucketConfigError => "InvalidBucketConfigError",
            MorayErrorKind::InvalidBucketNameError => "InvalidBucketNameError",
            MorayErrorKind::InvalidIndexDefinitionError => "InvalidIndexDefinitionError",
            MorayErrorKind::NotFunctionError => "NotFunctionError",
            MorayErrorKind::BucketVersionError => "BucketVersionError",
            MorayErrorKind::InvalidIndexesRemovalError => "InvalidIndexesRemovalError",
            MorayErrorKind::SchemaChangesSameVersionError => "SchemaChangesSameVersionError",
            MorayErrorKind::InvalidIndexTypeError => "InvalidIndexTypeError",
            MorayErrorKind::InvalidQueryError => "InvalidQueryError",
            MorayErrorKind::NotIndexedError => "NotIndexedError",
            MorayErrorKind::UniqueAttributeError => "UniqueAttributeError",
        };
        f.write_str(s)
    }
}

/// An error returned by the storage client, with an optional chain of causes.
///
/// This is the only error type the `MorayClient` trait (see [`crate::client`])
/// returns; it is deliberately not an enum of concrete failure modes, because
/// the remote itself reports failures as a generic message plus an optional
/// named cause, and callers (including tests) need to be able to construct
/// arbitrary chains to reproduce remote behavior.
#[derive(Debug)]
pub struct MorayError {
    pub kind: Option<MorayErrorKind>,
    pub message: String,
    pub cause: Option<Box<MorayError>>,
}

impl MorayError {
    /// A plain, unnamed error: what the remote returns for ordinary
    /// transient failures (timeouts, connection resets, overload, ...).
    pub fn generic(message: impl Into<String>) -> Self {
        MorayError { kind: None, message: message.into(), cause: None }
    }

    /// An error bearing one of the well-known named kinds.
    pub fn named(kind: MorayErrorKind, message: impl Into<String>) -> Self {
        MorayError { kind: Some(kind), message: message.into(), cause: None }
    }

    /// Wraps `self` as the cause of a new, generic outer error, the way a
    /// remote driver wraps a deeper failure ("batch failed: BucketNotFoundError").
    pub fn wrap(self, outer_message: impl Into<String>) -> Self {
        MorayError { kind: None, message: outer_message.into(), cause: Some(Box::new(self)) }
    }

    /// Iterates this error and each of its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &MorayError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }

    /// True if any error in the chain carries the given kind.
    pub fn chain_has_kind(&self, kind: MorayErrorKind) -> bool {
        self.chain().any(|e| e.kind == Some(kind))
    }
}

impl fmt::Display for MorayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MorayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors raised while validating construction inputs (§4.9, §7).
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("model name {0:?} is used by more than one bucket spec")]
    DuplicateModelName(String),

    #[error("remote bucket name {0:?} is used by more than one bucket spec")]
    DuplicateBucketName(String),

    #[error(
        "model {model:?} has a data migration plan but its bucket spec does \
         not declare an indexed `data_version` field of type `number`"
    )]
    MissingDataVersionIndex { model: String },

    #[error("migration plan references unknown model {0:?}")]
    UnknownModelInPlan(String),
}

/// Errors raised by the Migration Loader (§4.5).
#[derive(thiserror::Error, Debug)]
pub enum MigrationLoadError {
    #[error("could not read migration directory {path}: {source}")]
    ReadDir { path: String, #[source] source: std::io::Error },

    #[error("invalid data migration file names: {0:?}")]
    InvalidDataMigrationFileNames(Vec<String>),

    #[error(
        "model {model:?} migration versions must start at 1 and increase by \
         exactly 1; found {found} after {previous}"
    )]
    NonSequentialVersion { model: String, previous: u32, found: u32 },

    #[error(
        "model {model:?} file {file:?} declares version {declared} but its \
         position in the sorted sequence implies {expected}"
    )]
    VersionMismatch { model: String, file: String, declared: u32, expected: u32 },

    #[error(
        "model {model:?} file {file:?} (slug {slug:?}) has no migration \
         registered for it in the MigrationRegistry"
    )]
    UnregisteredMigration { model: String, file: String, slug: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by the Schema Reconciler (§4.3) after classification.
#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("bucket {bucket:?}: schema changed without a version bump")]
    SchemaChangesSameVersion { bucket: String },

    #[error("bucket {bucket:?}: index removal is not allowed: {removed:?}")]
    InvalidIndexesRemoval { bucket: String, removed: Vec<String> },

    #[error("bucket {bucket:?}: remote rejected schema operation: {source}")]
    Remote { bucket: String, #[source] source: MorayError },
}

/// Errors surfaced by the Migration Controller (§4.6) after classification.
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("model {model:?}: remote rejected migration query or write: {source}")]
    Remote { model: String, #[source] source: MorayError },
}

/// Lifecycle and retry-envelope errors (§7).
#[derive(thiserror::Error, Debug)]
pub enum InitializerError {
    #[error("buckets initializer has already been started")]
    AlreadyStarted,

    #[error("{phase} exceeded its maximum number of attempts")]
    MaxAttemptsReached { phase: &'static str },

    #[error("{phase} was cancelled")]
    Cancelled { phase: &'static str },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {0:?}")]
    InvalidConfig(Vec<ConfigError>),

    #[error(transparent)]
    MigrationLoad(#[from] MigrationLoadError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("reindex failed: {0}")]
    Reindex(MorayError),
}

impl InitializerError {
    /// Wraps every problem `BucketsConfig::validate` found, rather than
    /// picking just the first (§4.9: "a single `ConfigError` enumerating
    /// every problem found").
    pub fn from_config_errors(errors: Vec<ConfigError>) -> Self {
        InitializerError::InvalidConfig(errors)
    }
}
