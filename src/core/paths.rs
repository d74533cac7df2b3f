// src/core/paths.rs

use crate::errors::{DoitomlError, Result};
use std::path::{Component, Path, PathBuf};

/// The roots every resolved filesystem path must stay inside.
///
/// Empty until the first configuration source is claimed; an empty set
/// accepts everything.
#[derive(Debug, Clone, Default)]
pub struct SafePaths {
    roots: Vec<PathBuf>,
}

impl SafePaths {
    /// True once a root has been added.
    pub fn is_seeded(&self) -> bool {
        !self.roots.is_empty()
    }

    /// The normalized roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Adds a root, normalized. Duplicates are ignored.
    pub fn add(&mut self, root: &Path) {
        let root = normalize_path(root);
        if !self.roots.contains(&root) {
            log::debug!("Safe path added: {}", root.display());
            self.roots.push(root);
        }
    }

    /// Fails unless `path` is one of the roots or inside one of them.
    pub fn check(&self, path: &Path) -> Result<()> {
        if self.roots.is_empty() {
            return Ok(());
        }
        let normalized = normalize_path(path);
        if self.roots.iter().any(|root| normalized.starts_with(root)) {
            return Ok(());
        }
        Err(DoitomlError::UnsafePath {
            path: to_posix(&normalized),
            safe_paths: self.roots.iter().map(|r| to_posix(r)).collect(),
        })
    }
}

/// Makes an absolute path canonical without requiring it to exist.
///
/// `.` and `..` are folded lexically, then the deepest existing ancestor is
/// canonicalized (resolving symlinks) and the missing tail re-attached.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }

    let mut existing = clean.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = dunce::canonicalize(existing) {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return clean,
        }
    }
}

/// Renders a path with forward slashes and a lowercase drive letter.
pub fn to_posix(path: &Path) -> String {
    let text = dunce::simplified(path).to_string_lossy().replace('\\', "/");
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("{}:{}", drive.to_ascii_lowercase(), chars.as_str())
        }
        _ => text,
    }
}

/// Expands `~` and `$VAR` in a configured path and anchors it at `base`.
///
/// # Arguments
/// * `template` - The configured path, e.g. `~/shared` or `../sibling`.
/// * `base` - The directory relative paths are resolved against.
pub fn expand_path_template(template: &str, base: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::full(template).map_err(|e| {
        DoitomlError::Config(format!("Failed to expand path '{}': {}", template, e))
    })?;
    Ok(normalize_path(&base.join(expanded.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn normalizes_missing_paths_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path());
        let odd = dir.path().join("a").join("..").join("b").join(".").join("c.txt");
        assert_eq!(normalize_path(&odd), root.join("b").join("c.txt"));
    }

    #[test]
    fn safe_paths_contain_descendants_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();
        let mut safe = SafePaths::default();
        assert!(safe.check(Path::new("/anywhere")).is_ok());
        safe.add(&dir.path().join("inner"));
        assert!(safe.check(&dir.path().join("inner").join("x")).is_ok());
        let escaped = safe.check(&dir.path().join("inner").join("..").join("outer"));
        assert!(matches!(escaped, Err(DoitomlError::UnsafePath { .. })));
    }

    #[test]
    fn posix_paths_use_forward_slashes() {
        assert_eq!(to_posix(Path::new("/a/b")), "/a/b");
    }
}
