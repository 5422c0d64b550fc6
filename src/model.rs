//! Core data model shared by the registry, resolver, and runner layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The OCI annotation marking a bundle manifest as carrying a migration.
pub const ANNOTATION_HAS_MIGRATION: &str = "dev.konflux-ci.task.has-migration";
/// The OCI annotation marking a referrer as the migration script itself.
pub const ANNOTATION_IS_MIGRATION: &str = "dev.konflux-ci.task.is-migration";
/// The artifact type a migration-script referrer must declare.
pub const MIGRATION_ARTIFACT_TYPE: &str = "text/x-shellscript";

/// A fully qualified OCI reference.
///
/// A bundle is identified by `digest`; `tag` is a hint used for discovery
/// and version ordering. References used for execution (migration runner
/// env vars, manual `--new-bundle` replacement) must carry both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleRef {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl BundleRef {
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            digest: digest.into(),
        }
    }

    /// The `repository@digest` form used to address the registry directly.
    #[must_use]
    pub fn digest_ref(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }
}

impl std::fmt::Display for BundleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.repository, self.tag, self.digest)
    }
}

/// One dependency-bump record from the upgrades JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Upgrade {
    #[serde(rename = "depName")]
    pub dep_name: String,
    #[serde(rename = "currentValue")]
    pub current_value: String,
    #[serde(rename = "currentDigest")]
    pub current_digest: String,
    #[serde(rename = "newValue")]
    pub new_value: String,
    #[serde(rename = "newDigest")]
    pub new_digest: String,
    #[serde(rename = "packageFile")]
    pub package_file: String,
    #[serde(rename = "parentDir")]
    pub parent_dir: String,
    #[serde(rename = "depTypes")]
    pub dep_types: Vec<String>,
}

/// The `depTypes` marker that identifies a task-bundle upgrade.
pub const TASK_BUNDLE_DEP_TYPE: &str = "tekton-bundle";

impl Upgrade {
    #[must_use]
    pub fn is_task_bundle(&self) -> bool {
        self.dep_types.iter().any(|t| t == TASK_BUNDLE_DEP_TYPE)
    }

    /// The dedup key used when filtering a batch of upgrades.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.dep_name.clone(),
            self.current_digest.clone(),
            self.new_digest.clone(),
        )
    }
}

/// One `(tag, digest, last_modified)` entry in a repository's tag history,
/// as returned newest-first by the tag-listing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub tag: String,
    pub digest: String,
    pub last_modified: DateTime<Utc>,
}

/// A migration script attached to a bundle as an OCI referrer.
///
/// Invariant: at most one migration per bundle. See
/// [`crate::bundle::BundleInspector::fetch_migration`].
#[derive(Debug, Clone)]
pub struct Migration {
    pub bundle: BundleRef,
    pub script_bytes: Vec<u8>,
    pub script_name: String,
}

/// One entry in the orchestrator's global execution plan.
#[derive(Debug, Clone)]
pub struct MigrationPlanEntry {
    pub migration: Migration,
    pub pipeline_file: PathBuf,
    pub upgrade_context: UpgradeContext,
}

/// The subset of an [`Upgrade`] the migration runner exposes to a script
/// through its environment, beyond the pipeline file path argument itself.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    pub dep_name: String,
    pub package_file: String,
    pub parent_dir: String,
}

impl From<&Upgrade> for UpgradeContext {
    fn from(upgrade: &Upgrade) -> Self {
        Self {
            dep_name: upgrade.dep_name.clone(),
            package_file: upgrade.package_file.clone(),
            parent_dir: upgrade.parent_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_ref_display_and_digest_ref() {
        let r = BundleRef::new("quay.io/ns/task-clone", "0.2", "sha256:abc");
        assert_eq!(r.to_string(), "quay.io/ns/task-clone:0.2@sha256:abc");
        assert_eq!(r.digest_ref(), "quay.io/ns/task-clone@sha256:abc");
    }

    #[test]
    fn upgrade_is_task_bundle_requires_marker() {
        let upgrade = Upgrade {
            dep_name: "task-clone".into(),
            current_value: "0.1".into(),
            current_digest: "sha256:aaa".into(),
            new_value: "0.2".into(),
            new_digest: "sha256:bbb".into(),
            package_file: ".tekton/pr.yaml".into(),
            parent_dir: ".tekton".into(),
            dep_types: vec!["other".into()],
        };
        assert!(!upgrade.is_task_bundle());

        let upgrade = Upgrade {
            dep_types: vec![TASK_BUNDLE_DEP_TYPE.into()],
            ..upgrade
        };
        assert!(upgrade.is_task_bundle());
    }

    #[test]
    fn upgrade_json_ignores_unknown_fields() {
        let json = serde_json::json!({
            "depName": "task-clone",
            "currentValue": "0.1",
            "currentDigest": "sha256:aaa",
            "newValue": "0.2",
            "newDigest": "sha256:bbb",
            "packageFile": ".tekton/pr.yaml",
            "parentDir": ".tekton",
            "depTypes": ["tekton-bundle"],
            "someFutureField": "ignored",
        });
        let upgrade: Upgrade = serde_json::from_value(json).expect("should parse");
        assert_eq!(upgrade.dep_name, "task-clone");
    }
}
