//! Ignore Filter.
//!
//! Parses a single root-level `.gitignore` (no descent into nested
//! `.gitignore`s — deliberately narrower than `ignore::WalkBuilder`'s default
//! behavior) and exposes a predicate plus a directory walker that prunes on
//! it.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

/// Predicate over paths relative to a single root, built from that root's
/// `.gitignore` if present. Absent file ⇒ constant-false predicate.
pub struct IgnoreFilter {
    root: PathBuf,
    gitignore: Option<Gitignore>,
}

impl IgnoreFilter {
    /// Load `<root>/.gitignore`, plus `skip_dirs` overrides from an optional
    /// `<root>/.owlspot.toml`. A missing `.gitignore` is not an error: the
    /// resulting filter simply ignores nothing from it. A malformed file
    /// logs a warning and is likewise treated as a no-op.
    pub fn load(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut any_pattern = false;

        let gitignore_path = root.join(".gitignore");
        if gitignore_path.is_file() {
            if let Some(err) = builder.add(&gitignore_path) {
                warn!(path = %gitignore_path.display(), error = %err, "malformed .gitignore, treating as no-op");
            } else {
                any_pattern = true;
            }
        }

        for dir in skip_dirs_from_config(root) {
            if builder.add_line(None, &format!("{dir}/")).is_ok() {
                any_pattern = true;
            }
        }

        if !any_pattern {
            return IgnoreFilter { root: root.to_path_buf(), gitignore: None };
        }

        match builder.build() {
            Ok(gi) => IgnoreFilter { root: root.to_path_buf(), gitignore: Some(gi) },
            Err(err) => {
                warn!(root = %root.display(), error = %err, "failed to compile ignore patterns, treating as no-op");
                IgnoreFilter { root: root.to_path_buf(), gitignore: None }
            }
        }
    }

    /// True if `path` (absolute, or relative to the filter's root) matches an
    /// ignore pattern. `is_dir` selects directory-only pattern matching
    /// (trailing `/` patterns).
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(gi) = &self.gitignore else { return false };
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if rel.as_os_str().is_empty() {
            return false;
        }
        gi.matched_path_or_any_parents(rel, is_dir).is_ignore()
    }

    /// Recursively walk `root`, collecting files whose extension (without a
    /// leading dot) equals `ext`. Directories matching the filter as a
    /// directory pattern are never entered. Entries within each directory
    /// are sorted lexicographically before descending, so discovery order is
    /// stable across runs.
    pub fn collect_files(&self, ext: &str) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.walk_dir(&self.root.clone(), ext, &mut out);
        out
    }

    fn walk_dir(&self, dir: &Path, ext: &str, out: &mut Vec<PathBuf>) {
        let mut entries: Vec<_> = match fs::read_dir(dir) {
            Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "failed to read directory during scan");
                return;
            }
        };
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                if self.is_ignored(&path, true) {
                    continue;
                }
                self.walk_dir(&path, ext, out);
            } else if file_type.is_file() {
                if self.is_ignored(&path, false) {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                    out.push(path);
                }
            }
        }
    }
}

/// Reads `skip_dirs = [...]` out of `<root>/.owlspot.toml` as a raw
/// `toml::Table` rather than a serde struct, since this is the only field
/// this crate cares about. Absent or malformed files yield an empty list.
fn skip_dirs_from_config(root: &Path) -> Vec<String> {
    let config_path = root.join(".owlspot.toml");
    let Ok(content) = fs::read_to_string(&config_path) else { return Vec::new() };

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(err) => {
            warn!(path = %config_path.display(), error = %err, "malformed .owlspot.toml, ignoring skip_dirs");
            return Vec::new();
        }
    };

    table
        .get("skip_dirs")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn no_gitignore_ignores_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x").unwrap();
        let filter = IgnoreFilter::load(dir.path());
        let files = filter.collect_files("py");
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn gitignore_prunes_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
        fs::create_dir(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build").join("a.py"), "x").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("new.py"), "y").unwrap();

        let filter = IgnoreFilter::load(dir.path());
        let files = filter.collect_files("py");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/new.py"));
    }

    #[test]
    fn negation_reincludes_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.py\n!keep.py\n").unwrap();
        fs::write(dir.path().join("a.py"), "x").unwrap();
        fs::write(dir.path().join("keep.py"), "y").unwrap();

        let filter = IgnoreFilter::load(dir.path());
        let files = filter.collect_files("py");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.py"));
    }

    #[test]
    fn owlspot_toml_skip_dirs_prunes_directory_without_gitignore() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".owlspot.toml"), "skip_dirs = [\"vendor\"]\n").unwrap();
        fs::create_dir(dir.path().join("vendor")).unwrap();
        fs::write(dir.path().join("vendor").join("a.py"), "x").unwrap();
        fs::write(dir.path().join("keep.py"), "y").unwrap();

        let filter = IgnoreFilter::load(dir.path());
        let files = filter.collect_files("py");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.py"));
    }

    #[test]
    fn discovery_order_is_lexicographic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "x").unwrap();
        fs::write(dir.path().join("a.py"), "y").unwrap();
        let filter = IgnoreFilter::load(dir.path());
        let files = filter.collect_files("py");
        assert!(files[0].ends_with("a.py"));
        assert!(files[1].ends_with("b.py"));
    }
}
