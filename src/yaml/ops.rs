//! Semantic operations layered on the generic path-based surgeon: the
//! `task.<name>.*` commands used by the `modify` sub-command (and, through
//! it, by migration scripts), plus the raw path type the `generic`
//! sub-command and the surgeon itself operate on.

use serde_yaml::{Mapping, Value};

use crate::model::BundleRef;
use crate::utils::error::PmtError;
use crate::yaml::surgeon::YamlSurgeon;

/// One segment of a path into a YAML document: a mapping key or a
/// sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A path from the document root to a target node, as a sequence of
/// mapping keys and sequence indices.
pub type YamlPath = Vec<PathSegment>;

/// A generic, path-addressed edit to a YAML document.
#[derive(Debug, Clone)]
pub enum Op {
    Insert { path: YamlPath, value: Value },
    Replace { path: YamlPath, value: Value },
    Remove { path: YamlPath },
}

/// Parses a `modify ... generic` path argument (a JSON array of strings
/// and non-negative integers) into a [`YamlPath`].
pub fn parse_generic_path(raw: &serde_json::Value) -> Result<YamlPath, PmtError> {
    let entries = raw
        .as_array()
        .ok_or_else(|| PmtError::InvalidInput("yaml-path must be a JSON array".to_string()))?;
    entries
        .iter()
        .map(|entry| {
            if let Some(key) = entry.as_str() {
                Ok(PathSegment::Key(key.to_string()))
            } else if let Some(index) = entry.as_u64() {
                Ok(PathSegment::Index(usize::try_from(index).unwrap_or(usize::MAX)))
            } else {
                Err(PmtError::InvalidInput(
                    "yaml-path entries must be strings or non-negative integers".to_string(),
                ))
            }
        })
        .collect()
}

/// Parses a CLI-supplied scalar value, trying bool then number before
/// falling back to a plain string. `modify`/`add-task` arguments arrive as
/// plain strings with no type annotation, the same ambiguity `clap`
/// pushes down to callers for untyped positional arguments.
#[must_use]
pub fn parse_scalar_value(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Value::Number(n.into());
    }
    Value::String(raw.to_string())
}

fn key_path(prefix: &[&str]) -> YamlPath {
    prefix.iter().map(|k| PathSegment::Key((*k).to_string())).collect()
}

fn navigate<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_mapping()?.get(Value::String((*key).to_string()))?;
    }
    Some(current)
}

/// Finds the index of the task named `task_name` under `spec_path.tasks`.
fn find_task_index(root: &Value, spec_path: &[&str], task_name: &str) -> Result<usize, PmtError> {
    let tasks = navigate(root, spec_path)
        .and_then(|spec| spec.as_mapping())
        .and_then(|spec| spec.get(Value::String("tasks".to_string())))
        .and_then(Value::as_sequence)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("{} has no tasks list", spec_path.join("."))))?;

    tasks
        .iter()
        .position(|task| {
            task.as_mapping()
                .and_then(|m| m.get(Value::String("name".to_string())))
                .and_then(Value::as_str)
                == Some(task_name)
        })
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("task '{task_name}' not found")))
}

fn task_path(spec_path: &[&str], task_index: usize) -> YamlPath {
    let mut path = key_path(spec_path);
    path.push(PathSegment::Key("tasks".to_string()));
    path.push(PathSegment::Index(task_index));
    path
}

fn task_mapping<'a>(root: &'a Value, spec_path: &[&str], task_index: usize) -> Option<&'a Mapping> {
    navigate(root, spec_path)?
        .as_mapping()?
        .get(Value::String("tasks".to_string()))?
        .as_sequence()?
        .get(task_index)?
        .as_mapping()
}

fn param_entry(mapping: &Mapping) -> Option<(&str, &Value)> {
    let name = mapping.get(Value::String("name".to_string()))?.as_str()?;
    let value = mapping.get(Value::String("value".to_string()))?;
    Some((name, value))
}

fn find_param_index(task: &Mapping, key: &str) -> Option<usize> {
    task.get(Value::String("params".to_string()))?
        .as_sequence()?
        .iter()
        .position(|p| p.as_mapping().and_then(param_entry).is_some_and(|(name, _)| name == key))
}

fn new_param_entry(key: &str, value: &Value) -> Value {
    let mut mapping = Mapping::new();
    mapping.insert(Value::String("name".to_string()), Value::String(key.to_string()));
    mapping.insert(Value::String("value".to_string()), value.clone());
    Value::Mapping(mapping)
}

/// Appends a `{name, value}` entry under the task's params list.
/// No-op if a param with that name already exists and its value matches;
/// fails unless `replace` when the existing value differs.
pub fn add_param(
    source: &str,
    spec_path: &[&str],
    task_name: &str,
    key: &str,
    value: &Value,
    replace: bool,
) -> Result<String, PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let task_index = find_task_index(&root, spec_path, task_name)?;
    let task = task_mapping(&root, spec_path, task_index)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("task '{task_name}' is not a mapping")))?;

    if let Some(param_index) = find_param_index(task, key) {
        let (_, existing_value) = task
            .get(Value::String("params".to_string()))
            .and_then(Value::as_sequence)
            .and_then(|params| params.get(param_index))
            .and_then(Value::as_mapping)
            .and_then(param_entry)
            .expect("find_param_index only returns valid indices");

        if existing_value == value {
            return Ok(source.to_string());
        }
        if !replace {
            return Err(PmtError::YamlSurgeryConflict(format!(
                "param '{key}' already exists on task '{task_name}' with a different value; pass --replace to overwrite"
            )));
        }
        let mut path = task_path(spec_path, task_index);
        path.push(PathSegment::Key("params".to_string()));
        path.push(PathSegment::Index(param_index));
        path.push(PathSegment::Key("value".to_string()));
        return apply_one(source, Op::Replace { path, value: value.clone() });
    }

    let params_exists = task.get(Value::String("params".to_string())).is_some();
    let mut path = task_path(spec_path, task_index);
    path.push(PathSegment::Key("params".to_string()));
    if params_exists {
        path.push(PathSegment::Index(usize::MAX));
        apply_one(source, Op::Insert { path, value: new_param_entry(key, value) })
    } else {
        apply_one(
            source,
            Op::Insert {
                path,
                value: Value::Sequence(vec![new_param_entry(key, value)]),
            },
        )
    }
}

/// Overwrites an existing param's value, or appends it if missing.
pub fn set_param(source: &str, spec_path: &[&str], task_name: &str, key: &str, value: &Value) -> Result<String, PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let task_index = find_task_index(&root, spec_path, task_name)?;
    let task = task_mapping(&root, spec_path, task_index)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("task '{task_name}' is not a mapping")))?;

    if let Some(param_index) = find_param_index(task, key) {
        let mut path = task_path(spec_path, task_index);
        path.push(PathSegment::Key("params".to_string()));
        path.push(PathSegment::Index(param_index));
        path.push(PathSegment::Key("value".to_string()));
        return apply_one(source, Op::Replace { path, value: value.clone() });
    }

    add_param(source, spec_path, task_name, key, value, true)
}

/// Removes the param named `key` from the task. Fails if not present.
pub fn remove_param(source: &str, spec_path: &[&str], task_name: &str, key: &str) -> Result<String, PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let task_index = find_task_index(&root, spec_path, task_name)?;
    let task = task_mapping(&root, spec_path, task_index)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("task '{task_name}' is not a mapping")))?;
    let param_index = find_param_index(task, key)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("param '{key}' not found on task '{task_name}'")))?;

    let mut path = task_path(spec_path, task_index);
    path.push(PathSegment::Key("params".to_string()));
    path.push(PathSegment::Index(param_index));
    apply_one(source, Op::Remove { path })
}

/// Adds `task_ref` to the task's `runAfter` list; idempotent.
pub fn add_run_after(source: &str, spec_path: &[&str], task_name: &str, task_ref: &str) -> Result<String, PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let task_index = find_task_index(&root, spec_path, task_name)?;
    let task = task_mapping(&root, spec_path, task_index)
        .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("task '{task_name}' is not a mapping")))?;

    let run_after = task.get(Value::String("runAfter".to_string())).and_then(Value::as_sequence);
    if let Some(run_after) = run_after {
        if run_after.iter().any(|v| v.as_str() == Some(task_ref)) {
            return Ok(source.to_string());
        }
        let mut path = task_path(spec_path, task_index);
        path.push(PathSegment::Key("runAfter".to_string()));
        path.push(PathSegment::Index(usize::MAX));
        apply_one(source, Op::Insert { path, value: Value::String(task_ref.to_string()) })
    } else {
        let mut path = task_path(spec_path, task_index);
        path.push(PathSegment::Key("runAfter".to_string()));
        apply_one(
            source,
            Op::Insert {
                path,
                value: Value::Sequence(vec![Value::String(task_ref.to_string())]),
            },
        )
    }
}

/// Appends a new task referencing `bundle_ref` via the Tekton `bundles`
/// resolver, for the `add-task` sub-command. The task is appended at the
/// end of `spec_path.tasks`; wiring `runAfter` onto prior tasks is left to
/// a follow-up `modify task <name> add-run-after` call, not done here.
pub fn add_task(source: &str, spec_path: &[&str], bundle_ref: &BundleRef, task_name: &str) -> Result<String, PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    if find_task_index(&root, spec_path, task_name).is_ok() {
        return Err(PmtError::YamlSurgeryConflict(format!("task '{task_name}' already exists")));
    }

    let mut task_ref_params = Mapping::new();
    task_ref_params.insert(Value::String("resolver".to_string()), Value::String("bundles".to_string()));
    let mut param_entries = Vec::new();
    for (name, value) in [("name", task_name), ("bundleRef", &bundle_ref.to_string()), ("kind", "task")] {
        let mut entry = Mapping::new();
        entry.insert(Value::String("name".to_string()), Value::String(name.to_string()));
        entry.insert(Value::String("value".to_string()), Value::String(value.to_string()));
        param_entries.push(Value::Mapping(entry));
    }
    task_ref_params.insert(Value::String("params".to_string()), Value::Sequence(param_entries));

    let mut task = Mapping::new();
    task.insert(Value::String("name".to_string()), Value::String(task_name.to_string()));
    task.insert(Value::String("taskRef".to_string()), Value::Mapping(task_ref_params));

    let mut path = key_path(spec_path);
    path.push(PathSegment::Key("tasks".to_string()));
    path.push(PathSegment::Index(usize::MAX));
    apply_one(source, Op::Insert { path, value: Value::Mapping(task) })
}

/// The repository portion of a `repo:tag@digest`-shaped bundle-ref value,
/// as used in a Tekton `bundles` resolver's `bundleRef` param.
fn repository_of_bundle_ref_value(value: &str) -> Option<&str> {
    let (left, _digest) = value.split_once('@')?;
    left.rsplit_once(':').map(|(repo, _tag)| repo)
}

/// Replaces every `taskRef` bundle reference whose repository matches
/// `new_ref.repository` with `new_ref`'s full `repo:tag@digest` form, for
/// the manual `--new-bundle` replacement path. Returns the edited source
/// and the number of replacements made; zero means the file had no
/// matching bundle reference and is left untouched.
pub fn replace_bundle_refs(source: &str, spec_path: &[&str], new_ref: &BundleRef) -> Result<(String, usize), PmtError> {
    let root: Value = serde_yaml::from_str(source).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let tasks = navigate(&root, spec_path)
        .and_then(|spec| spec.as_mapping())
        .and_then(|spec| spec.get(Value::String("tasks".to_string())))
        .and_then(Value::as_sequence)
        .map(<[Value]>::len)
        .unwrap_or(0);

    let mut current = source.to_string();
    let mut replaced = 0;
    for task_index in 0..tasks {
        if let Some(param_index) = bundle_ref_param_index(&root, spec_path, task_index, &new_ref.repository) {
            let mut path = task_path(spec_path, task_index);
            path.push(PathSegment::Key("taskRef".to_string()));
            path.push(PathSegment::Key("params".to_string()));
            path.push(PathSegment::Index(param_index));
            path.push(PathSegment::Key("value".to_string()));
            current = apply_one(&current, Op::Replace {
                path,
                value: Value::String(new_ref.to_string()),
            })?;
            replaced += 1;
        }
    }
    Ok((current, replaced))
}

fn bundle_ref_param_index(root: &Value, spec_path: &[&str], task_index: usize, repository: &str) -> Option<usize> {
    let task = navigate(root, spec_path)?
        .as_mapping()?
        .get(Value::String("tasks".to_string()))?
        .as_sequence()?
        .get(task_index)?
        .as_mapping()?;
    let params = task
        .get(Value::String("taskRef".to_string()))?
        .as_mapping()?
        .get(Value::String("params".to_string()))?
        .as_sequence()?;
    params.iter().position(|param| {
        let Some(mapping) = param.as_mapping() else { return false };
        let is_bundle_ref = mapping.get(Value::String("name".to_string())).and_then(Value::as_str) == Some("bundleRef");
        let matches_repo = mapping
            .get(Value::String("value".to_string()))
            .and_then(Value::as_str)
            .and_then(repository_of_bundle_ref_value)
            == Some(repository);
        is_bundle_ref && matches_repo
    })
}

fn apply_one(source: &str, op: Op) -> Result<String, PmtError> {
    let mut surgeon = YamlSurgeon::new(source);
    surgeon.apply(&op)?;
    Ok(surgeon.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = "kind: Pipeline\nspec:\n  tasks:\n    - name: clone\n      params:\n        - name: url\n          value: https://example.com\n    - name: build\n      runAfter:\n        - clone\n";

    #[test]
    fn add_param_is_noop_when_value_matches() {
        let out = add_param(PIPELINE, &["spec"], "clone", "url", &Value::String("https://example.com".into()), false)
            .expect("add_param");
        assert_eq!(out, PIPELINE);
    }

    #[test]
    fn add_param_fails_on_conflicting_value_without_replace() {
        let err = add_param(PIPELINE, &["spec"], "clone", "url", &Value::String("other".into()), false).unwrap_err();
        assert!(matches!(err, PmtError::YamlSurgeryConflict(_)));
    }

    #[test]
    fn add_param_replaces_when_requested() {
        let out = add_param(PIPELINE, &["spec"], "clone", "url", &Value::String("other".into()), true).expect("add_param");
        assert!(out.contains("value: other"));
        assert!(!out.contains("https://example.com"));
    }

    #[test]
    fn add_param_appends_new_param() {
        let out = add_param(PIPELINE, &["spec"], "clone", "depth", &Value::Number(1.into()), false).expect("add_param");
        assert!(out.contains("name: depth"));
        assert!(out.contains("value: 1"));
        assert!(out.contains("name: url"));
    }

    #[test]
    fn add_param_creates_params_list_when_absent() {
        let out = add_param(PIPELINE, &["spec"], "build", "flags", &Value::String("-v".into()), false).expect("add_param");
        assert!(out.contains("build"));
        assert!(out.contains("flags"));
    }

    #[test]
    fn remove_param_errors_when_missing() {
        let err = remove_param(PIPELINE, &["spec"], "clone", "nope").unwrap_err();
        assert!(matches!(err, PmtError::YamlSurgeryConflict(_)));
    }

    #[test]
    fn remove_param_deletes_existing_entry() {
        let out = remove_param(PIPELINE, &["spec"], "clone", "url").expect("remove_param");
        assert!(!out.contains("name: url"));
    }

    #[test]
    fn add_run_after_is_idempotent() {
        let out = add_run_after(PIPELINE, &["spec"], "build", "clone").expect("add_run_after");
        assert_eq!(out, PIPELINE);
    }

    #[test]
    fn add_run_after_appends_new_ref() {
        let out = add_run_after(PIPELINE, &["spec"], "build", "lint").expect("add_run_after");
        assert!(out.contains("- clone"));
        assert!(out.contains("- lint"));
    }

    #[test]
    fn add_run_after_creates_list_when_absent() {
        let out = add_run_after(PIPELINE, &["spec"], "clone", "checkout").expect("add_run_after");
        assert!(out.contains("runAfter"));
        assert!(out.contains("- checkout"));
    }

    #[test]
    fn add_task_appends_bundle_resolver_task() {
        let bundle = BundleRef::new("quay.io/ns/task-lint", "0.1", "sha256:ccc");
        let out = add_task(PIPELINE, &["spec"], &bundle, "lint").expect("add_task");
        assert!(out.contains("name: lint"));
        assert!(out.contains("resolver: bundles"));
        assert!(out.contains("value: quay.io/ns/task-lint:0.1@sha256:ccc"));
        assert!(out.contains("name: clone"));
    }

    #[test]
    fn add_task_rejects_duplicate_name() {
        let bundle = BundleRef::new("quay.io/ns/task-clone", "0.2", "sha256:ccc");
        let err = add_task(PIPELINE, &["spec"], &bundle, "clone").unwrap_err();
        assert!(matches!(err, PmtError::YamlSurgeryConflict(_)));
    }

    #[test]
    fn parse_generic_path_accepts_mixed_segments() {
        let raw = serde_json::json!(["spec", "tasks", 0, "name"]);
        let path = parse_generic_path(&raw).expect("parse");
        assert_eq!(
            path,
            vec![
                PathSegment::Key("spec".into()),
                PathSegment::Key("tasks".into()),
                PathSegment::Index(0),
                PathSegment::Key("name".into()),
            ]
        );
    }

    const BUNDLE_PIPELINE: &str = "kind: Pipeline\nspec:\n  tasks:\n    - name: clone\n      taskRef:\n        resolver: bundles\n        params:\n          - name: bundleRef\n            value: quay.io/ns/task-clone:0.1@sha256:aaa\n          - name: name\n            value: clone\n";

    #[test]
    fn replace_bundle_refs_updates_matching_repository() {
        let new_ref = crate::model::BundleRef::new("quay.io/ns/task-clone", "0.2", "sha256:bbb");
        let (out, count) = replace_bundle_refs(BUNDLE_PIPELINE, &["spec"], &new_ref).expect("replace");
        assert_eq!(count, 1);
        assert!(out.contains("value: quay.io/ns/task-clone:0.2@sha256:bbb"));
        assert!(!out.contains("sha256:aaa"));
    }

    #[test]
    fn replace_bundle_refs_is_noop_for_unmatched_repository() {
        let new_ref = crate::model::BundleRef::new("quay.io/ns/other-task", "0.2", "sha256:bbb");
        let (out, count) = replace_bundle_refs(BUNDLE_PIPELINE, &["spec"], &new_ref).expect("replace");
        assert_eq!(count, 0);
        assert_eq!(out, BUNDLE_PIPELINE);
    }

    #[test]
    fn parse_scalar_value_picks_tightest_type() {
        assert_eq!(parse_scalar_value("true"), Value::Bool(true));
        assert_eq!(parse_scalar_value("42"), Value::Number(42.into()));
        assert_eq!(parse_scalar_value("hello"), Value::String("hello".into()));
    }
}
