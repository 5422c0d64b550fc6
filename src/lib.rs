//! pipeline-migration-tool: resolves and applies OCI task-bundle
//! migrations to Tekton pipeline definitions.
//!
//! The `migrate` flow runs four components in sequence:
//! 1. the [`resolver::MigrationResolver`] walks a bundle's tag history to
//!    find every migration between an upgrade's old and new digest;
//! 2. the [`orchestrator::Orchestrator`] merges the resolved migrations for
//!    a batch of upgrades into one deterministic execution plan;
//! 3. the [`runner::MigrationRunner`] executes that plan's scripts in
//!    order against their matched pipeline files;
//! 4. on the `add-task`/`modify` paths, [`yaml::ops`] edits pipeline YAML
//!    directly through the [`yaml::surgeon::YamlSurgeon`] without going
//!    through a migration script at all.
//!
//! Registry I/O (manifests, referrers, blobs, tag history) is cached
//! per-process by [`registry::RequestCache`], which also coalesces
//! concurrent fan-out so the same bundle is never inspected twice in one
//! run.

pub mod bundle;
pub mod cli;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod utils;
pub mod yaml;

use std::path::PathBuf;
use std::sync::Arc;

use cli::args::{AddTaskArgs, Args, Command, GenericOp, MigrateArgs, ModifyArgs, ModifyResource, TaskOp};
use model::{BundleRef, Upgrade};
use registry::{DistributionTagLister, OciRegistryClient, RequestCache};
use utils::error::PmtError;

/// Initializes the global `tracing` subscriber at a verbosity derived from
/// `-v` repeat count. Idempotent: safe to call more than once (e.g. from
/// tests), since a second install is silently ignored rather than panicking.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Registry host every bundle reference in this tool is assumed to live
/// on. Konflux task bundles are published to Quay; a future multi-registry
/// mode would thread this through per-repository instead.
const REGISTRY_HOST: &str = "quay.io";

/// Root of the versioned migration-script layout consulted by
/// `--use-legacy-migration-search`. Relative to the current working
/// directory; development-only, so not exposed as a CLI flag.
const LEGACY_MIGRATIONS_ROOT: &str = ".migrations";

/// Wires the registry/resolver/runner stack together and dispatches on the
/// parsed CLI command. The binary's `main` is responsible for turning the
/// `Result` into an exit code.
pub async fn run(args: Args) -> Result<(), PmtError> {
    match args.command {
        Command::Migrate(migrate_args) => run_migrate(migrate_args).await,
        Command::AddTask(add_task_args) => run_add_task(add_task_args),
        Command::Modify(modify_args) => run_modify(modify_args),
    }
}

async fn run_migrate(args: MigrateArgs) -> Result<(), PmtError> {
    if !args.new_bundle.is_empty() {
        return run_new_bundle(&args.new_bundle, &args.pipeline_file);
    }

    let upgrades_json = args
        .upgrades
        .as_deref()
        .ok_or_else(|| PmtError::InvalidInput("--upgrades is required unless --new-bundle is given".to_string()))?;
    let upgrades: Vec<Upgrade> = serde_json::from_str(upgrades_json)?;

    let inspector: Arc<dyn bundle::MigrationSource> = if args.use_legacy_migration_search {
        tracing::warn!("--use-legacy-migration-search is for development use only");
        Arc::new(bundle::LegacyDirectoryMigrationSource::new(PathBuf::from(LEGACY_MIGRATIONS_ROOT)))
    } else {
        let registry = Arc::new(OciRegistryClient::new(REGISTRY_HOST));
        let manifest_cache = Arc::new(RequestCache::new());
        let referrers_cache = Arc::new(RequestCache::new());
        Arc::new(bundle::BundleInspector::new(registry, manifest_cache, referrers_cache))
    };

    let tags = Arc::new(DistributionTagLister::new(REGISTRY_HOST));
    let tag_list_cache = Arc::new(RequestCache::new());
    let resolver = Arc::new(resolver::MigrationResolver::new(tags, inspector, tag_list_cache).with_fanout(args.registry_concurrency));

    let runner = runner::MigrationRunner::new(std::env::current_dir().map_err(|e| PmtError::InvalidInput(e.to_string()))?)
        .with_timeout(std::time::Duration::from_secs(args.migration_timeout_seconds));

    let orchestrator = orchestrator::Orchestrator::new(resolver, runner);
    let explicit_files = (!args.pipeline_file.is_empty()).then_some(args.pipeline_file.as_slice());
    let report = orchestrator.migrate(upgrades, explicit_files).await?;

    for applied in &report.applied {
        println!("applied {} to {}", applied.bundle_ref, applied.pipeline_file.display());
    }
    for (path, reason) in &report.skipped_files {
        tracing::warn!(file = %path.display(), %reason, "skipped pipeline file");
    }
    Ok(())
}

/// `migrate --new-bundle repo:tag@digest`: replaces a bundle reference
/// directly, bypassing tag-history resolution and migration scripts.
fn run_new_bundle(new_bundles: &[String], pipeline_file: &[PathBuf]) -> Result<(), PmtError> {
    if pipeline_file.is_empty() {
        return Err(PmtError::InvalidInput("--new-bundle requires at least one --pipeline-file".to_string()));
    }
    let files = pipeline_file.to_vec();
    for raw in new_bundles {
        let new_ref = parse_bundle_ref(raw)?;
        let total = orchestrator::replace_bundle(&new_ref, &files)?;
        println!("replaced {total} bundle reference(s) with {new_ref}");
    }
    Ok(())
}

fn run_add_task(args: AddTaskArgs) -> Result<(), PmtError> {
    let bundle_ref = parse_bundle_ref(&args.bundle_ref)?;
    let task_name = args
        .pipeline_task_name
        .clone()
        .unwrap_or_else(|| default_task_name(&bundle_ref));

    let files = if args.pipeline_file.is_empty() {
        pipeline::discover_files(std::path::Path::new(pipeline::DEFAULT_ROOT))?
    } else {
        args.pipeline_file.clone()
    };

    for file in &files {
        let doc = pipeline::classify(file)?;
        let Some(spec_path) = doc.spec_path() else {
            tracing::warn!(file = %file.display(), "no local pipeline spec to add a task to; skipping");
            continue;
        };
        let rendered = yaml::add_task(&doc.source, spec_path, &bundle_ref, &task_name)?;
        std::fs::write(file, rendered).map_err(|source| PmtError::PipelineFileUnreadable {
            path: file.clone(),
            source,
        })?;
        println!("added task '{task_name}' to {}", file.display());
    }
    Ok(())
}

fn run_modify(args: ModifyArgs) -> Result<(), PmtError> {
    let doc = pipeline::classify(&args.pipeline_file)?;
    let spec_path = doc
        .spec_path()
        .ok_or_else(|| PmtError::InvalidInput(format!("{} has no local pipeline spec to edit", args.pipeline_file.display())))?;

    let rendered = match args.resource {
        ModifyResource::Task { name, op } => apply_task_op(&doc.source, spec_path, &name, op)?,
        ModifyResource::Generic { op } => apply_generic_op(&doc.source, op)?,
    };

    std::fs::write(&args.pipeline_file, rendered).map_err(|source| PmtError::PipelineFileUnreadable {
        path: args.pipeline_file.clone(),
        source,
    })?;
    Ok(())
}

fn apply_task_op(source: &str, spec_path: &[&str], task_name: &str, op: TaskOp) -> Result<String, PmtError> {
    match op {
        TaskOp::AddParam { key, value, replace } => {
            yaml::add_param(source, spec_path, task_name, &key, &yaml::parse_scalar_value(&value), replace)
        }
        TaskOp::SetParam { key, value } => yaml::set_param(source, spec_path, task_name, &key, &yaml::parse_scalar_value(&value)),
        TaskOp::RemoveParam { key } => yaml::remove_param(source, spec_path, task_name, &key),
        TaskOp::AddRunAfter { task_ref } => yaml::add_run_after(source, spec_path, task_name, &task_ref),
    }
}

fn apply_generic_op(source: &str, op: GenericOp) -> Result<String, PmtError> {
    let (yaml_path, value) = match &op {
        GenericOp::Insert { yaml_path, value } | GenericOp::Replace { yaml_path, value } => (yaml_path, Some(value)),
        GenericOp::Remove { yaml_path } => (yaml_path, None),
    };
    let path = yaml::parse_generic_path(&serde_json::from_str(yaml_path)?)?;

    let generic_op = match (&op, value) {
        (GenericOp::Insert { .. }, Some(value)) => yaml::Op::Insert { path, value: yaml::parse_scalar_value(value) },
        (GenericOp::Replace { .. }, Some(value)) => yaml::Op::Replace { path, value: yaml::parse_scalar_value(value) },
        (GenericOp::Remove { .. }, None) => yaml::Op::Remove { path },
        _ => unreachable!("Insert/Replace always carry a value, Remove never does"),
    };

    let mut surgeon = yaml::YamlSurgeon::new(source);
    surgeon.apply(&generic_op)?;
    Ok(surgeon.render())
}

fn parse_bundle_ref(raw: &str) -> Result<BundleRef, PmtError> {
    let (left, digest) = raw
        .split_once('@')
        .ok_or_else(|| PmtError::InvalidInput(format!("bundle reference '{raw}' is missing a @digest")))?;
    let (repository, tag) = left
        .rsplit_once(':')
        .ok_or_else(|| PmtError::InvalidInput(format!("bundle reference '{raw}' is missing a :tag")))?;
    Ok(BundleRef::new(repository, tag, digest))
}

fn default_task_name(bundle_ref: &BundleRef) -> String {
    bundle_ref.repository.rsplit('/').next().unwrap_or(&bundle_ref.repository).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bundle_ref_splits_tag_and_digest() {
        let r = parse_bundle_ref("quay.io/ns/task-clone:0.2@sha256:abc").expect("parse");
        assert_eq!(r.repository, "quay.io/ns/task-clone");
        assert_eq!(r.tag, "0.2");
        assert_eq!(r.digest, "sha256:abc");
    }

    #[test]
    fn parse_bundle_ref_rejects_missing_digest() {
        assert!(parse_bundle_ref("quay.io/ns/task-clone:0.2").is_err());
    }

    #[test]
    fn default_task_name_uses_repository_basename() {
        let r = BundleRef::new("quay.io/ns/task-clone", "0.2", "sha256:abc");
        assert_eq!(default_task_name(&r), "task-clone");
    }
}
