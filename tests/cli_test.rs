//! CLI-level integration tests: the binary parses its own `--help`/
//! `--version`, and `add-task`/`modify` edit a real file on disk without
//! touching the network.

mod common;

use std::process::Command;

#[test]
fn cli_shows_help() {
    let output = Command::new(common::pmt_bin()).arg("--help").output().expect("run pmt --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("migrate"));
    assert!(stdout.contains("add-task"));
    assert!(stdout.contains("modify"));
}

#[test]
fn cli_shows_version() {
    let output = Command::new(common::pmt_bin()).arg("--version").output().expect("run pmt --version");
    assert!(output.status.success());
}

#[test]
fn cli_rejects_missing_subcommand() {
    let output = Command::new(common::pmt_bin()).output().expect("run pmt");
    assert!(!output.status.success());
}

#[test]
fn add_task_appends_a_bundle_resolver_task_to_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline_path = common::write_fixture(
        dir.path(),
        "pipeline.yaml",
        "kind: Pipeline\nspec:\n  tasks:\n    - name: clone\n      params: []\n",
    );

    let output = Command::new(common::pmt_bin())
        .args([
            "add-task",
            "quay.io/ns/task-lint:0.1@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            pipeline_path.to_str().expect("utf8 path"),
            "--pipeline-task-name",
            "lint",
        ])
        .output()
        .expect("run pmt add-task");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let contents = std::fs::read_to_string(&pipeline_path).expect("read edited pipeline");
    assert!(contents.contains("name: lint"));
    assert!(contents.contains("resolver: bundles"));
    assert!(contents.contains("name: clone"), "original task should be preserved");
}

#[test]
fn modify_task_add_param_is_idempotent_on_repeat_invocation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline_path = common::write_fixture(
        dir.path(),
        "pipeline.yaml",
        "kind: Pipeline\nspec:\n  tasks:\n    - name: clone\n      params: []\n",
    );

    let run = || {
        Command::new(common::pmt_bin())
            .args([
                "modify",
                "--pipeline-file",
                pipeline_path.to_str().expect("utf8 path"),
                "task",
                "clone",
                "add-param",
                "depth",
                "1",
            ])
            .output()
            .expect("run pmt modify")
    };

    let first = run();
    assert!(first.status.success(), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    let after_first = std::fs::read_to_string(&pipeline_path).expect("read after first run");
    assert!(after_first.contains("name: depth"));

    let second = run();
    assert!(second.status.success(), "stderr: {}", String::from_utf8_lossy(&second.stderr));
    let after_second = std::fs::read_to_string(&pipeline_path).expect("read after second run");
    assert_eq!(after_first, after_second, "re-adding the same param/value must be a no-op");
}

#[test]
fn migrate_new_bundle_replaces_matching_reference() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline_path = common::write_fixture(
        dir.path(),
        "pipeline.yaml",
        "kind: Pipeline\nspec:\n  tasks:\n    - name: clone\n      taskRef:\n        resolver: bundles\n        params:\n          - name: bundleRef\n            value: quay.io/ns/task-clone:0.1@sha256:aaa\n",
    );

    let output = Command::new(common::pmt_bin())
        .args([
            "migrate",
            "--new-bundle",
            "quay.io/ns/task-clone:0.2@sha256:bbb",
            "--pipeline-file",
            pipeline_path.to_str().expect("utf8 path"),
        ])
        .output()
        .expect("run pmt migrate --new-bundle");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let contents = std::fs::read_to_string(&pipeline_path).expect("read edited pipeline");
    assert!(contents.contains("sha256:bbb"));
    assert!(!contents.contains("sha256:aaa"));
}
