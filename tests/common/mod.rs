//! Common test utilities for CLI-level integration tests.

use std::path::PathBuf;

/// Path to the `pipeline-migration-tool` binary built by Cargo for
/// integration tests.
pub fn pmt_bin() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_pipeline-migration-tool") {
        return PathBuf::from(path);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let target_dir = std::env::var("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("target"));

    let exe = if cfg!(windows) {
        "pipeline-migration-tool.exe"
    } else {
        "pipeline-migration-tool"
    };
    let subdir = if cfg!(debug_assertions) { "debug" } else { "release" };
    target_dir.join(subdir).join(exe)
}

/// Writes `contents` to `dir`/`relative_path`, creating parent directories
/// as needed.
pub fn write_fixture(dir: &std::path::Path, relative_path: &str, contents: &str) -> PathBuf {
    let path = dir.join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture parent dir");
    }
    std::fs::write(&path, contents).expect("write fixture");
    path
}
