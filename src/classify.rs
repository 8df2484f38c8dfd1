// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error Classifier (§4.1): maps a [`MorayError`] into transient or terminal
//! for a given phase.

use crate::error::{MorayError, MorayErrorKind};

/// The phase a [`MorayError`] is being classified for. Reindex has no
/// terminal kinds at all (§4.4), so it is not represented here; callers in
/// the reindex driver never consult the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BucketsSetup,
    DataMigration,
}

const SETUP_TERMINAL: &[MorayErrorKind] = &[
    MorayErrorKind::InvalidBucketConfigError,
    MorayErrorKind::InvalidBucketNameError,
    MorayErrorKind::InvalidIndexDefinitionError,
    MorayErrorKind::NotFunctionError,
    MorayErrorKind::BucketVersionError,
    MorayErrorKind::InvalidIndexesRemovalError,
    MorayErrorKind::SchemaChangesSameVersionError,
];

const MIGRATION_TERMINAL: &[MorayErrorKind] = &[
    MorayErrorKind::BucketNotFoundError,
    MorayErrorKind::InvalidIndexTypeError,
    MorayErrorKind::InvalidQueryError,
    MorayErrorKind::NotIndexedError,
    MorayErrorKind::UniqueAttributeError,
];

/// True if `err` (or any cause in its chain) is terminal for `phase`.
///
/// The data-migration selection step treats `InvalidQueryError` specially
/// (§4.6): it never reaches this classifier, because it's handled entirely
/// inside the stale schema-cache retry loop before the Backoff Runner would
/// ever see it.
pub fn is_terminal(phase: Phase, err: &MorayError) -> bool {
    let terminal_kinds = match phase {
        Phase::BucketsSetup => SETUP_TERMINAL,
        Phase::DataMigration => MIGRATION_TERMINAL,
    };
    err.chain().any(|e| matches!(e.kind, Some(k) if terminal_kinds.contains(&k)))
}

/// Convenience wrapper for classifying into a bool `is_transient`, the shape
/// the Backoff Runner's contract (§4.2) expects.
pub fn is_transient(phase: Phase, err: &MorayError) -> bool {
    !is_terminal(phase, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_errors_are_transient_everywhere() {
        let err = MorayError::generic("connection reset");
        assert!(is_transient(Phase::BucketsSetup, &err));
        assert!(is_transient(Phase::DataMigration, &err));
    }

    #[test]
    fn named_setup_terminal_kinds_are_terminal() {
        for kind in SETUP_TERMINAL {
            let err = MorayError::named(*kind, "boom");
            assert!(is_terminal(Phase::BucketsSetup, &err), "{kind} should be terminal");
        }
    }

    #[test]
    fn reindex_kinds_are_transient_for_setup_and_migration() {
        // Reindex has no terminal set of its own; this just confirms that a
        // migration-terminal kind doesn't leak into the setup classification.
        let err = MorayError::named(MorayErrorKind::BucketNotFoundError, "gone");
        assert!(is_terminal(Phase::DataMigration, &err));
        assert!(!is_terminal(Phase::BucketsSetup, &err));
    }

    #[test]
    fn terminal_kind_buried_in_cause_chain_is_found() {
        let inner = MorayError::named(MorayErrorKind::BucketNotFoundError, "no such bucket");
        let outer = inner.wrap("batch write failed");
        assert!(is_terminal(Phase::DataMigration, &outer));
    }

    #[test]
    fn classifier_totality() {
        // Property 8: every kind is classified one way or the other for its
        // own phase, and never panics for the other phase.
        for kind in SETUP_TERMINAL.iter().chain(MIGRATION_TERMINAL.iter()) {
            let err = MorayError::named(*kind, "x");
            let _ = is_terminal(Phase::BucketsSetup, &err);
            let _ = is_terminal(Phase::DataMigration, &err);
        }
    }
}
