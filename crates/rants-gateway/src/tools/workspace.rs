//! Sandbox path resolution shared by all filesystem tools.

use std::path::{Component, Path, PathBuf};

/// Resolve a tool-supplied path against the workspace root. The deepest
/// existing prefix is canonicalized (following symlinks) and the remaining
/// components are normalized lexically, so neither symlinks nor `..`
/// segments can land outside the root.
pub fn resolve_path(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let root = std::fs::canonicalize(root)
        .map_err(|error| format!("workspace root is unavailable: {error}"))?;
    let joined = root.join(requested);

    let (existing, tail) = split_existing_prefix(&joined);
    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for component in &tail {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(format!("path '{requested}' escapes the workspace root"))
    }
}

/// Split a path into its deepest existing ancestor and the trailing
/// components that do not exist yet.
fn split_existing_prefix(path: &Path) -> (PathBuf, Vec<Component<'_>>) {
    let mut prefix = path.to_path_buf();
    let mut popped = 0usize;
    while !prefix.exists() && prefix.pop() {
        popped += 1;
    }
    let components: Vec<Component<'_>> = path.components().collect();
    let tail = components[components.len() - popped..].to_vec();
    (prefix, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_inside_root_resolve() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "hi").expect("seed file");
        let resolved = resolve_path(dir.path(), "a.txt").expect("should resolve");
        assert!(resolved.ends_with("a.txt"));
    }

    #[test]
    fn nonexistent_children_resolve_under_root() {
        let dir = tempdir().expect("tempdir");
        let resolved = resolve_path(dir.path(), "new/nested/file.txt").expect("should resolve");
        assert!(resolved.starts_with(std::fs::canonicalize(dir.path()).expect("canonical root")));
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let dir = tempdir().expect("tempdir");
        assert!(resolve_path(dir.path(), "../outside.txt").is_err());
        assert!(resolve_path(dir.path(), "missing/../../outside.txt").is_err());
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let dir = tempdir().expect("tempdir");
        assert!(resolve_path(dir.path(), "/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let outside = tempdir().expect("second tempdir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link"))
            .expect("create symlink");
        assert!(resolve_path(dir.path(), "link/secret.txt").is_err());
    }
}
