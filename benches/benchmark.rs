//! Benchmarks for the YAML surgeon's splice path: the one place in this
//! crate where throughput on large documents is a real concern, since
//! every `migrate`/`add-task`/`modify` invocation re-serializes only the
//! region it touched rather than the whole document.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use pipeline_migration_tool::model::BundleRef;
use pipeline_migration_tool::yaml::{add_param, parse_scalar_value, replace_bundle_refs};

/// Builds a `Pipeline` document with `task_count` tasks, each carrying a
/// bundle-resolver `taskRef` and a couple of params, to approximate the
/// shape and size of a real `.tekton/*.yaml` file.
fn generate_pipeline(task_count: usize) -> String {
    let mut doc = String::from("kind: Pipeline\nspec:\n  tasks:\n");
    for i in 0..task_count {
        doc.push_str(&format!(
            "    - name: task-{i}\n      taskRef:\n        resolver: bundles\n        params:\n          - name: name\n            value: task-{i}\n          - name: bundle\n            value: quay.io/ns/task-{i}\n          - name: kind\n            value: task\n      params:\n        - name: existing-param\n          value: \"x\"\n"
        ));
    }
    doc
}

fn bench_add_param(c: &mut Criterion) {
    let mut group = c.benchmark_group("yaml_add_param");

    for task_count in [10_usize, 100, 1_000] {
        let doc = generate_pipeline(task_count);
        let target = format!("task-{}", task_count / 2);

        group.bench_with_input(BenchmarkId::new("tasks", task_count), &doc, |b, doc| {
            b.iter(|| {
                let value = parse_scalar_value("true");
                std::hint::black_box(add_param(doc, &["spec"], &target, "skip-checks", &value, false).expect("add_param"))
            });
        });
    }

    group.finish();
}

fn bench_replace_bundle_refs(c: &mut Criterion) {
    let mut group = c.benchmark_group("yaml_replace_bundle_refs");

    for task_count in [10_usize, 100, 1_000] {
        let mut doc = String::from("kind: Pipeline\nspec:\n  tasks:\n");
        for i in 0..task_count {
            doc.push_str(&format!(
                "    - name: task-{i}\n      taskRef:\n        resolver: bundles\n        params:\n          - name: bundleRef\n            value: quay.io/ns/task-clone:0.1@sha256:{i:064x}\n"
            ));
        }
        let new_ref = BundleRef::new("quay.io/ns/task-clone", "0.2", "sha256:bbb");

        group.bench_with_input(BenchmarkId::new("tasks", task_count), &doc, |b, doc| {
            b.iter(|| std::hint::black_box(replace_bundle_refs(doc, &["spec"], &new_ref).expect("replace_bundle_refs")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_param, bench_replace_bundle_refs);
criterion_main!(benches);
