//! Enumerates YAML files under a root directory (default `.tekton/`).

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use crate::utils::error::PmtError;

/// The default directory `migrate`/`add-task` scan when no explicit file
/// list is given.
pub const DEFAULT_ROOT: &str = ".tekton";

fn yaml_globset() -> Result<GlobSet, PmtError> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new("*.yaml").map_err(|e| PmtError::InvalidInput(e.to_string()))?);
    builder.add(Glob::new("*.yml").map_err(|e| PmtError::InvalidInput(e.to_string()))?);
    builder.build().map_err(|e| PmtError::InvalidInput(e.to_string()))
}

/// Enumerates every `.yaml`/`.yml` file under `root`, respecting
/// `.gitignore` the way a normal repository walk would. Symlinks are not
/// followed.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>, PmtError> {
    let globset = yaml_globset()?;
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .follow_links(false)
        .build();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("error walking {}: {err}", root.display());
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if entry.path_is_symlink() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if globset.is_match(name.as_ref()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
