use crate::error::{AppError, Result};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Relative path used for the root node.
pub const ROOT_KEY: &str = ".";

/// Repository metadata never listed, counted or exported. Ignore files are
/// still read by the rule matcher.
const SKIPPED_NAMES: &[&str] = &[".git", ".gitignore"];

pub fn canonicalize_root(root_path: &str) -> Result<PathBuf> {
    let raw = root_path.trim();
    if raw.is_empty() {
        return Err(AppError::RootRequired);
    }
    let canonical = fs::canonicalize(raw).map_err(|e| AppError::RootInvalid {
        path: PathBuf::from(raw),
        source: e,
    })?;
    if !canonical.is_dir() {
        return Err(AppError::RootNotDir { path: canonical });
    }
    Ok(canonical)
}

/// Resolves `dir_path` (relative to `root`, or absolute) to a canonical
/// directory contained in `root`. Containment is checked on canonical paths
/// so `..` segments and symlinks cannot escape.
pub fn resolve_dir_under_root(root: &Path, dir_path: &str) -> Result<PathBuf> {
    let trimmed = dir_path.trim();
    if trimmed.is_empty() || trimmed == ROOT_KEY {
        return Ok(root.to_path_buf());
    }

    let candidate = Path::new(trimmed);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let canonical = match fs::canonicalize(&joined) {
        Ok(path) => path,
        Err(e) => {
            // A path that cannot be resolved is only reported as missing when
            // it would have been inside the root lexically.
            if !lexically_contained(root, &joined) {
                return Err(AppError::PathOutsideRoot {
                    path: trimmed.to_string(),
                });
            }
            return Err(AppError::read("Failed to resolve dirPath", joined, e));
        }
    };

    if !canonical.starts_with(root) {
        return Err(AppError::PathOutsideRoot {
            path: trimmed.to_string(),
        });
    }
    if !canonical.is_dir() {
        return Err(AppError::DirPathNotDir {
            path: trimmed.to_string(),
        });
    }
    Ok(canonical)
}

fn lexically_contained(root: &Path, candidate: &Path) -> bool {
    let mut depth: i64 = 0;
    let rest = match candidate.strip_prefix(root) {
        Ok(rest) => rest,
        Err(_) => return false,
    };
    for component in rest.components() {
        match component {
            std::path::Component::ParentDir => depth -= 1,
            std::path::Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    true
}

/// Forward-slash relative path of `abs` below `root`; `.` for the root itself.
pub fn relative_unix_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = pathdiff::diff_paths(abs, root)?;
    let text = normalize_key(&rel.to_string_lossy());
    if text.is_empty() {
        Some(ROOT_KEY.to_string())
    } else {
        Some(text)
    }
}

/// Normalizes a caller-supplied key: backslashes to `/`, no leading `./`,
/// no leading or trailing `/`.
pub fn normalize_key(input: &str) -> String {
    let replaced = input.trim().replace('\\', "/");
    let mut text = replaced.as_str();
    while let Some(rest) = text.strip_prefix("./") {
        text = rest;
    }
    text.trim_matches('/').to_string()
}

pub fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == ROOT_KEY {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent key of a relative path (`.` for top-level entries).
pub fn parent_key(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(idx) => &rel[..idx],
        None => ROOT_KEY,
    }
}

/// Absolute path of a relative key under `root`.
pub fn abs_path(root: &Path, rel: &str) -> PathBuf {
    if rel == ROOT_KEY {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

pub fn is_skipped_name(name: &str) -> bool {
    SKIPPED_NAMES.contains(&name)
}

/// Scanner order: directories first, then case-insensitive name, ties broken
/// by the exact name so the order is total.
pub fn compare_entries(name_a: &str, is_dir_a: bool, name_b: &str, is_dir_b: bool) -> Ordering {
    match (is_dir_a, is_dir_b) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => name_a
            .to_lowercase()
            .cmp(&name_b.to_lowercase())
            .then_with(|| name_a.cmp(name_b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn canonicalize_root_rejects_blank_path() {
        let err = canonicalize_root("   ").unwrap_err();
        assert!(matches!(err, AppError::RootRequired));
    }

    #[test]
    fn canonicalize_root_rejects_missing_and_file_paths() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = canonicalize_root(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, AppError::RootInvalid { .. }));

        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = canonicalize_root(&file.to_string_lossy()).unwrap_err();
        assert!(matches!(err, AppError::RootNotDir { .. }));
    }

    #[test]
    fn resolve_dir_rejects_parent_traversal() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(dir.path().join("outside")).unwrap();
        let root = fs::canonicalize(&root).unwrap();

        let err = resolve_dir_under_root(&root, "../outside").unwrap_err();
        assert!(matches!(err, AppError::PathOutsideRoot { .. }));

        let err = resolve_dir_under_root(&root, "../does-not-exist").unwrap_err();
        assert!(matches!(err, AppError::PathOutsideRoot { .. }));
    }

    #[test]
    fn resolve_dir_rejects_files_and_accepts_root_aliases() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join("file.txt"), "x").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();

        let err = resolve_dir_under_root(&root, "file.txt").unwrap_err();
        assert!(matches!(err, AppError::DirPathNotDir { .. }));
        assert_eq!(resolve_dir_under_root(&root, ".").unwrap(), root);
        assert_eq!(resolve_dir_under_root(&root, "").unwrap(), root);
        assert_eq!(resolve_dir_under_root(&root, "sub").unwrap(), root.join("sub"));
        assert_eq!(resolve_dir_under_root(&root, "sub/../sub").unwrap(), root.join("sub"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_dir_rejects_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let err = resolve_dir_under_root(&root, "link").unwrap_err();
        assert!(matches!(err, AppError::PathOutsideRoot { .. }));
    }

    #[test]
    fn normalize_key_strips_noise() {
        assert_eq!(normalize_key("./src/lib/"), "src/lib");
        assert_eq!(normalize_key("src\\main.rs"), "src/main.rs");
        assert_eq!(normalize_key("././a"), "a");
        assert_eq!(normalize_key("."), ".");
    }

    #[test]
    fn parent_key_and_join_are_inverse() {
        assert_eq!(parent_key("a.txt"), ".");
        assert_eq!(parent_key("src/lib/mod.rs"), "src/lib");
        assert_eq!(join_rel(".", "a.txt"), "a.txt");
        assert_eq!(join_rel("src", "main.rs"), "src/main.rs");
    }

    #[test]
    fn compare_entries_puts_directories_first_then_case_insensitive() {
        let mut names = vec![
            ("beta.txt", false),
            ("Alpha.txt", false),
            ("zdir", true),
            ("Adir", true),
        ];
        names.sort_by(|a, b| compare_entries(a.0, a.1, b.0, b.1));
        let ordered: Vec<&str> = names.iter().map(|(n, _)| *n).collect();
        assert_eq!(ordered, vec!["Adir", "zdir", "Alpha.txt", "beta.txt"]);
    }
}
