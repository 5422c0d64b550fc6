//! Orchestrator (C9): top-level `migrate` flow — parse upgrades, resolve
//! each one's migration list, merge into a single global plan, run it.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::model::{BundleRef, MigrationPlanEntry, Upgrade, UpgradeContext};
use crate::pipeline::{self, PipelineKind};
use crate::resolver::MigrationResolver;
use crate::runner::{AppliedMigration, MigrationRunner};
use crate::utils::error::PmtError;
use crate::yaml;

/// The result of a `migrate` invocation: every migration actually applied,
/// plus the pipeline files that were candidates but skipped (unreadable,
/// unparseable, or not a usable Pipeline spec).
#[derive(Debug, Default)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub skipped_files: Vec<(PathBuf, String)>,
}

pub struct Orchestrator {
    resolver: Arc<MigrationResolver>,
    runner: MigrationRunner,
}

impl Orchestrator {
    #[must_use]
    pub fn new(resolver: Arc<MigrationResolver>, runner: MigrationRunner) -> Self {
        Self { resolver, runner }
    }

    /// Runs the full `migrate` flow for a batch of upgrades.
    ///
    /// `explicit_files`, when given (`--pipeline-file`), restricts every
    /// upgrade's file set to exactly that list instead of discovery under
    /// `parentDir`.
    pub async fn migrate(
        &self,
        upgrades: Vec<Upgrade>,
        explicit_files: Option<&[PathBuf]>,
    ) -> Result<MigrateReport, PmtError> {
        let unique = dedupe_task_bundle_upgrades(upgrades);

        let mut plan = Vec::new();
        let mut skipped_files = Vec::new();
        let mut any_migration_needed_files = false;

        for upgrade in &unique {
            let migrations = self.resolver.resolve(upgrade).await?;
            if migrations.is_empty() {
                continue;
            }
            any_migration_needed_files = true;

            let mut files = candidate_files(upgrade, explicit_files)?;
            files.retain(|file| match classify_for_plan(file) {
                Ok(true) => true,
                Ok(false) => false,
                Err(reason) => {
                    tracing::warn!(file = %file.display(), %reason, "skipping pipeline file");
                    skipped_files.push((file.clone(), reason));
                    false
                }
            });
            files.sort();

            for migration in migrations {
                for file in &files {
                    plan.push(MigrationPlanEntry {
                        migration: migration.clone(),
                        pipeline_file: file.clone(),
                        upgrade_context: UpgradeContext::from(upgrade),
                    });
                }
            }
        }

        if plan.is_empty() && any_migration_needed_files && !skipped_files.is_empty() {
            return Err(PmtError::InvalidInput(
                "every candidate pipeline file was unreadable or unparseable".to_string(),
            ));
        }

        let applied = self.runner.run(&plan).await?;
        Ok(MigrateReport { applied, skipped_files })
    }
}

/// The manual `--new-bundle` path: replaces a bundle reference in the
/// matched pipeline files without consulting the resolver or running any
/// migration script. Free function since it needs neither a resolver nor a
/// runner, unlike the rest of [`Orchestrator`].
pub fn replace_bundle(new_ref: &BundleRef, files: &[PathBuf]) -> Result<usize, PmtError> {
    let mut total = 0;
    for file in files {
        let doc = pipeline::classify(file)?;
        let Some(spec_path) = doc.spec_path() else {
            continue;
        };
        let (rendered, count) = yaml::replace_bundle_refs(&doc.source, spec_path, new_ref)?;
        if count > 0 {
            std::fs::write(file, rendered).map_err(|source| PmtError::PipelineFileUnreadable {
                path: file.clone(),
                source,
            })?;
        }
        total += count;
    }
    Ok(total)
}

/// Filters to task-bundle upgrades and de-duplicates by
/// `(depName, currentDigest, newDigest)`, keeping input order of first
/// occurrence — the plan's determinism (invariant 4) depends on this.
fn dedupe_task_bundle_upgrades(upgrades: Vec<Upgrade>) -> Vec<Upgrade> {
    let mut seen = HashSet::new();
    upgrades
        .into_iter()
        .filter(Upgrade::is_task_bundle)
        .filter(|upgrade| seen.insert(upgrade.dedup_key()))
        .collect()
}

/// The union of files discovered under `parentDir` and `packageFile`
/// itself, or exactly `explicit_files` when given.
fn candidate_files(upgrade: &Upgrade, explicit_files: Option<&[PathBuf]>) -> Result<Vec<PathBuf>, PmtError> {
    if let Some(explicit) = explicit_files {
        return Ok(explicit.to_vec());
    }
    let mut files: BTreeSet<PathBuf> = pipeline::discover_files(Path::new(&upgrade.parent_dir))?.into_iter().collect();
    files.insert(PathBuf::from(&upgrade.package_file));
    Ok(files.into_iter().collect())
}

/// Whether `file` should be in the plan: `Ok(true)` for a usable Pipeline
/// spec, `Ok(false)` to skip silently (non-pipeline or ref-only), `Err` to
/// skip with a logged reason (unreadable/unparseable).
fn classify_for_plan(file: &Path) -> Result<bool, String> {
    let doc = pipeline::classify(file).map_err(|e| e.to_string())?;
    match doc.kind {
        PipelineKind::Pipeline | PipelineKind::PipelineRunInline => Ok(true),
        PipelineKind::PipelineRunRefOnly => {
            tracing::warn!(file = %file.display(), "PipelineRun references an external pipeline; skipping");
            Ok(false)
        }
        PipelineKind::NonPipeline => Ok(false),
    }
}
