//! `workspaceContains:<glob>` evaluation

use crate::registry::selector::glob_to_regex;
use std::path::Path;
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

/// Dependency and VCS metadata directories never scanned
const EXCLUDED_DIRS: &[&str] = &["node_modules", "bower_components", ".git", ".hg", ".svn"];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

/// Whether any path under `root` matches one of `patterns`.
///
/// Patterns are matched against the `/`-separated path relative to `root`.
/// The walk stops at the first match.
pub fn workspace_contains(root: &Path, patterns: &[String]) -> bool {
    let compiled: Vec<_> = patterns
        .iter()
        .filter_map(|pattern| match glob_to_regex(pattern.trim_start_matches("./")) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Ignoring invalid workspaceContains pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect();
    if compiled.is_empty() {
        return false;
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry));

    for entry in walker.filter_map(Result::ok) {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let relative = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if compiled.iter().any(|regex| regex.is_match(&relative)) {
            trace!("workspaceContains matched {}", relative);
            return true;
        }
    }

    false
}

/// Runs [`workspace_contains`] on the blocking pool
pub async fn workspace_contains_async(root: &Path, patterns: Vec<String>) -> bool {
    let root = root.to_path_buf();
    match tokio::task::spawn_blocking(move || workspace_contains(&root, &patterns)).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Workspace scan failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_matches_nested_file() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "crates/core/Cargo.toml");

        assert!(workspace_contains(dir.path(), &["**/Cargo.toml".into()]));
        assert!(!workspace_contains(dir.path(), &["Cargo.toml".into()]));
        assert!(workspace_contains(dir.path(), &["crates/*/Cargo.toml".into()]));
    }

    #[test]
    fn test_excluded_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "node_modules/pkg/setup.py");
        touch(dir.path(), ".git/hooks/setup.py");

        assert!(!workspace_contains(dir.path(), &["**/setup.py".into()]));

        touch(dir.path(), "src/setup.py");
        assert!(workspace_contains(dir.path(), &["**/setup.py".into()]));
    }

    #[test]
    fn test_brace_alternatives() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "pyproject.toml");
        assert!(workspace_contains(dir.path(), &["{setup.py,pyproject.toml}".into()]));
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "go.mod");
        assert!(workspace_contains_async(dir.path(), vec!["go.mod".into()]).await);
        assert!(!workspace_contains_async(dir.path(), vec!["**/*.rs".into()]).await);
    }
}
