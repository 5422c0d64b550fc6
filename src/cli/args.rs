//! Command-line surface: `migrate`, `add-task`, `modify`.
//!
//! Modeled as a tagged `Subcommand` enum dispatched with an explicit
//! `match` in [`crate::run`], per the design note against string-keyed
//! runtime registries.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pmt", version, about = "Apply task-bundle migrations to Tekton pipeline definitions")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve and apply migrations for a batch of task-bundle upgrades.
    Migrate(MigrateArgs),
    /// Append a new task referencing a bundle to one or more pipelines.
    AddTask(AddTaskArgs),
    /// Apply a single stable edit to a pipeline YAML file.
    Modify(ModifyArgs),
}

#[derive(ClapArgs, Debug)]
pub struct MigrateArgs {
    /// JSON array of upgrade records (see the upgrades schema).
    #[arg(short = 'u', long, required_unless_present = "new_bundle")]
    pub upgrades: Option<String>,

    /// Manually replace a bundle reference without running any migration.
    /// Repeatable; format `<repository>:<tag>@<digest>`.
    #[arg(long = "new-bundle")]
    pub new_bundle: Vec<String>,

    /// Restrict discovery to exactly these pipeline files (repeatable).
    #[arg(long = "pipeline-file")]
    pub pipeline_file: Vec<PathBuf>,

    /// Fall back to reading migrations from a versioned directory layout
    /// instead of the registry. Development use only.
    #[arg(long = "use-legacy-migration-search")]
    pub use_legacy_migration_search: bool,

    /// Per-migration-script timeout, in seconds.
    #[arg(long, env = "PMT_MIGRATION_TIMEOUT_SECONDS", default_value_t = 120)]
    pub migration_timeout_seconds: u64,

    /// Bounded concurrency for registry I/O during migration resolution.
    #[arg(long, env = "PMT_REGISTRY_CONCURRENCY", default_value_t = 8)]
    pub registry_concurrency: usize,
}

#[derive(ClapArgs, Debug)]
pub struct AddTaskArgs {
    /// The bundle to reference, as `<repository>:<tag>@<digest>`.
    pub bundle_ref: String,

    /// Pipeline files to modify (defaults to discovery under `.tekton/`).
    pub pipeline_file: Vec<PathBuf>,

    /// Name for the new task (defaults to the bundle repository's basename).
    #[arg(long = "pipeline-task-name")]
    pub pipeline_task_name: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ModifyArgs {
    /// The pipeline file to edit.
    #[arg(short = 'f', long = "pipeline-file")]
    pub pipeline_file: PathBuf,

    #[command(subcommand)]
    pub resource: ModifyResource,
}

#[derive(Subcommand, Debug)]
pub enum ModifyResource {
    /// Edit a named task's params or `runAfter` list.
    Task {
        name: String,
        #[command(subcommand)]
        op: TaskOp,
    },
    /// Raw path-addressed edits, for anything the semantic commands don't cover.
    Generic {
        #[command(subcommand)]
        op: GenericOp,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskOp {
    /// Append a param; no-op if already present with the same value.
    AddParam {
        key: String,
        value: String,
        /// Overwrite an existing param with a conflicting value.
        #[arg(long)]
        replace: bool,
    },
    /// Overwrite an existing param, or append it if missing.
    SetParam { key: String, value: String },
    /// Remove an existing param.
    RemoveParam { key: String },
    /// Add a `runAfter` reference; idempotent.
    AddRunAfter { task_ref: String },
}

#[derive(Subcommand, Debug)]
pub enum GenericOp {
    /// Insert a value at `yaml_path` (a JSON array of keys/indices).
    Insert { yaml_path: String, value: String },
    /// Replace the value at `yaml_path`.
    Replace { yaml_path: String, value: String },
    /// Remove the entry at `yaml_path`.
    Remove { yaml_path: String },
}

#[must_use]
pub fn parse() -> Args {
    Args::parse()
}
