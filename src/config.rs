// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Desired Bucket Configuration (§3) and its construction-time validation
//! (§4.9).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::client::BucketSchema;
use crate::client::FieldType;
use crate::error::ConfigError;
use crate::migration::MigrationPlan;

/// A single bucket's desired configuration, keyed by model name in
/// [`BucketsConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    /// The remote bucket identifier.
    pub name: String,
    pub schema: BucketSchema,
}

/// The full desired configuration: model name -> bucket spec.
///
/// Insertion order is irrelevant (§3); a `BTreeMap` gives deterministic
/// iteration order for the sequential schema-reconciliation pass (§4.3) for
/// free, and that determinism is relied on by the idempotence tests.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BucketsConfig(pub BTreeMap<String, BucketSpec>);

impl BucketsConfig {
    pub fn new(specs: BTreeMap<String, BucketSpec>) -> Self {
        BucketsConfig(specs)
    }

    /// Builds a configuration from an ordered list of `(model, spec)` pairs,
    /// rejecting a repeated model name outright (§3: "model names are
    /// unique"). A `BTreeMap` literal can't encode that violation, since a
    /// repeated key simply overwrites; hosts that assemble their
    /// configuration from a list (e.g. parsed TOML/JSON array) should use
    /// this constructor instead of [`BucketsConfig::new`].
    pub fn try_from_entries(entries: Vec<(String, BucketSpec)>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for (model, spec) in entries {
            if map.insert(model.clone(), spec).is_some() {
                return Err(ConfigError::DuplicateModelName(model));
            }
        }
        Ok(BucketsConfig(map))
    }

    pub fn get(&self, model: &str) -> Option<&BucketSpec> {
        self.0.get(model)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BucketSpec)> {
        self.0.iter()
    }

    /// Validates the uniqueness invariants of §3 and, when `plan` is
    /// present, that every model it covers declares an indexed
    /// `data_version: number` field. Collects every problem found rather
    /// than failing on the first (§4.9).
    pub fn validate(&self, plan: Option<&MigrationPlan>) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        let mut seen_bucket_names: BTreeMap<&str, &str> = BTreeMap::new();
        for (model, spec) in self.0.iter() {
            if let Some(&other_model) = seen_bucket_names.get(spec.name.as_str()) {
                if other_model != model.as_str() {
                    errors.push(ConfigError::DuplicateBucketName(spec.name.clone()));
                }
            } else {
                seen_bucket_names.insert(spec.name.as_str(), model.as_str());
            }
        }

        if let Some(plan) = plan {
            for model in plan.models() {
                match self.0.get(model) {
                    None => errors.push(ConfigError::UnknownModelInPlan(model.to_string())),
                    Some(spec) => {
                        let has_data_version = spec
                            .schema
                            .index
                            .get("data_version")
                            .map(|t| *t == FieldType::Number)
                            .unwrap_or(false);
                        if !has_data_version {
                            errors.push(ConfigError::MissingDataVersionIndex {
                                model: model.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
