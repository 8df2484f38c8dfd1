// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Migration Loader (§4.5): parses a directory into an ordered, validated
//! [`MigrationPlan`].
//!
//! Grounded on the teacher's `all_sql_for_version_migration`
//! (`nexus/db-queries/src/db/datastore/db_metadata.rs`): scan a directory,
//! validate the filename-encoded ordering is exactly `1, 2, ..., k` with no
//! gaps and no repeats, and load in sorted order. That function loads SQL
//! text; this one resolves each file against a [`MigrationRegistry`]
//! instead, since there is no dynamic code loading in this crate (see
//! DESIGN.md Open Question resolution #4).

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::config::BucketsConfig;
use crate::error::{ConfigError, MigrationLoadError};

use super::{MigrationPlan, MigrationRegistry, MigrationStep, ModelMigrations};

/// Directory layout: `root/<modelName>/NNN-<slug>.<ext>` (§4.5).
struct ParsedFilename {
    number: u32,
    slug: String,
}

fn parse_filename(file_name: &str) -> Option<ParsedFilename> {
    let (number_str, rest) = file_name.split_once('-')?;
    if number_str.is_empty() || !number_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: u32 = number_str.parse().ok()?;
    let slug = rest.rsplit_once('.').map(|(slug, _ext)| slug).unwrap_or(rest);
    if slug.is_empty() {
        return None;
    }
    Some(ParsedFilename { number, slug: slug.to_string() })
}

/// Loads a [`MigrationPlan`] from `root`, validating it against `config`
/// (§4.5: the matching bucket spec's index must contain
/// `data_version: number`) and resolving each discovered file against
/// `registry`.
pub async fn load_plan(
    root: &Utf8Path,
    config: &BucketsConfig,
    registry: &MigrationRegistry,
) -> Result<MigrationPlan, MigrationLoadError> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| MigrationLoadError::ReadDir { path: root.to_string(), source: e })?;

    let mut model_dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrationLoadError::ReadDir { path: root.to_string(), source: e })?
    {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            model_dirs.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    model_dirs.sort();

    let mut plan = BTreeMap::new();
    for model in model_dirs {
        let model_dir = root.join(&model);
        let migrations = load_model_dir(&model_dir, &model, registry).await?;
        plan.insert(model, migrations);
    }

    let plan = MigrationPlan(plan);
    config.validate(Some(&plan)).map_err(|errors| {
        // Only the first is reported here; `MigrationLoadError::Config`
        // wraps a single `ConfigError` because that's the shape the
        // Orchestrator's terminal-error path expects. Configuration
        // problems independent of plan loading are still aggregated by
        // `BucketsConfig::validate` when called directly at construction.
        let first: ConfigError = errors.into_iter().next().expect("validate only errs with entries");
        MigrationLoadError::Config(first)
    })?;

    Ok(plan)
}

async fn load_model_dir(
    model_dir: &Utf8Path,
    model: &str,
    registry: &MigrationRegistry,
) -> Result<ModelMigrations, MigrationLoadError> {
    let mut entries = tokio::fs::read_dir(model_dir)
        .await
        .map_err(|e| MigrationLoadError::ReadDir { path: model_dir.to_string(), source: e })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrationLoadError::ReadDir { path: model_dir.to_string(), source: e })?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    let mut invalid = Vec::new();
    let mut parsed: Vec<(u32, String, String)> = Vec::new(); // (number, slug, file_name)
    for file_name in files {
        match parse_filename(&file_name) {
            Some(p) => parsed.push((p.number, p.slug, file_name)),
            None => invalid.push(file_name),
        }
    }
    if !invalid.is_empty() {
        invalid.sort();
        return Err(MigrationLoadError::InvalidDataMigrationFileNames(invalid));
    }

    parsed.sort_by_key(|(number, _, _)| *number);

    let mut steps = Vec::new();
    let mut expected = 1u32;
    for (number, slug, file_name) in parsed {
        if number != expected {
            return Err(MigrationLoadError::VersionMismatch {
                model: model.to_string(),
                file: file_name,
                declared: number,
                expected,
            });
        }
        let migrate = registry.get(model, &slug).ok_or_else(|| MigrationLoadError::UnregisteredMigration {
            model: model.to_string(),
            file: file_name.clone(),
            slug: slug.clone(),
        })?;
        steps.push(MigrationStep { version: number, migrate: migrate.clone() });
        expected += 1;
    }

    Ok(ModelMigrations(steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_filenames() {
        let p = parse_filename("001-add-bar.js").unwrap();
        assert_eq!(p.number, 1);
        assert_eq!(p.slug, "add-bar");
    }

    #[test]
    fn rejects_filenames_without_a_number_prefix() {
        assert!(parse_filename("add-bar.js").is_none());
    }

    #[test]
    fn rejects_filenames_without_a_dash() {
        assert!(parse_filename("001.js").is_none());
    }
}
