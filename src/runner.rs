//! Migration Runner (C8): executes a planned sequence of migration
//! scripts against their matched pipeline files, strictly in order.

use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::model::MigrationPlanEntry;
use crate::utils::error::PmtError;

/// Default per-script timeout, overridable via `PMT_MIGRATION_TIMEOUT_SECONDS`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One applied migration, reported back to the orchestrator for the
/// final one-line-per-migration summary.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub bundle_ref: String,
    pub pipeline_file: std::path::PathBuf,
}

pub struct MigrationRunner {
    repo_root: std::path::PathBuf,
    timeout: Duration,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `plan` in order. Stops at (and reports) the first failure;
    /// edits already applied by earlier entries are left on disk.
    pub async fn run(&self, plan: &[MigrationPlanEntry]) -> Result<Vec<AppliedMigration>, PmtError> {
        let mut applied = Vec::with_capacity(plan.len());
        for entry in plan {
            self.run_one(entry).await?;
            applied.push(AppliedMigration {
                bundle_ref: entry.migration.bundle.to_string(),
                pipeline_file: entry.pipeline_file.clone(),
            });
            tracing::info!(
                bundle = %entry.migration.bundle,
                pipeline_file = %entry.pipeline_file.display(),
                "applied migration"
            );
        }
        Ok(applied)
    }

    async fn run_one(&self, entry: &MigrationPlanEntry) -> Result<(), PmtError> {
        let script = write_script(&entry.migration.script_name, &entry.migration.script_bytes)?;

        let pipeline_path = std::fs::canonicalize(&entry.pipeline_file).unwrap_or_else(|_| entry.pipeline_file.clone());

        let mut command = Command::new(script.path());
        command
            .arg(&pipeline_path)
            .current_dir(&self.repo_root)
            .env("PMT_MIGRATION_BUNDLE_REF", entry.migration.bundle.to_string())
            .env("PMT_MIGRATION_VERSION", &entry.migration.bundle.tag)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_result = command.spawn();
        let mut child = spawn_result.map_err(|source| migration_failed(entry, source.to_string(), false))?;

        let wait = tokio::time::timeout(self.timeout, child.wait_with_output());
        let output = match wait.await {
            Ok(result) => result.map_err(|source| migration_failed(entry, source.to_string(), false))?,
            Err(_) => {
                return Err(migration_failed(
                    entry,
                    format!("script did not exit within {:?}", self.timeout),
                    true,
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(migration_failed(
                entry,
                format!(
                    "exited with {}: stderr: {} stdout: {}",
                    output.status,
                    stderr.trim(),
                    stdout.trim()
                ),
                false,
            ));
        }

        tracing::debug!(stdout = %String::from_utf8_lossy(&output.stdout), "migration script stdout");
        Ok(())
    }
}

fn migration_failed(entry: &MigrationPlanEntry, reason: String, timed_out: bool) -> PmtError {
    PmtError::MigrationFailed {
        bundle_ref: entry.migration.bundle.to_string(),
        pipeline_file: entry.pipeline_file.clone(),
        reason,
        timed_out,
    }
}

/// Writes the migration script to a scoped temp file with execute
/// permission. Dropping the returned handle removes the file, including
/// on early return and panic unwinds.
fn write_script(name: &str, bytes: &[u8]) -> Result<tempfile::NamedTempFile, PmtError> {
    let mut file = tempfile::Builder::new()
        .prefix("pmt-migration-")
        .suffix(&format!("-{name}"))
        .tempfile()
        .map_err(|e| PmtError::InvalidInput(format!("failed to create temp file for migration script: {e}")))?;

    file.write_all(bytes)
        .map_err(|e| PmtError::InvalidInput(format!("failed to write migration script: {e}")))?;
    file.flush()
        .map_err(|e| PmtError::InvalidInput(format!("failed to flush migration script: {e}")))?;

    set_executable(file.path())?;
    Ok(file)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), PmtError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| PmtError::InvalidInput(format!("failed to stat migration script: {e}")))?
        .permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(path, perms).map_err(|e| PmtError::InvalidInput(format!("failed to chmod migration script: {e}")))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), PmtError> {
    Ok(())
}
