//! Single-level directory listings. `scan_root`/`scan_children` annotate
//! entries for display; the resolver reuses [`read_dir_entries`] for
//! stat-only expansion of subtrees nobody has fetched.

use crate::config::{ExportConfig, ScanLimits};
use crate::error::{AppError, Result};
use crate::paths::{
    ROOT_KEY, canonicalize_root, compare_entries, is_skipped_name, join_rel, normalize_key,
    relative_unix_path, resolve_dir_under_root,
};
use crate::rules::RuleMatcher;
use crate::tree::TreeNode;
use log;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootScan {
    pub root: TreeNode,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBatch {
    pub nodes: Vec<TreeNode>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DirEntryInfo {
    pub name: String,
    pub rel: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    /// Canonical directory to descend into; `None` for files and for
    /// directories that must not be entered.
    pub descend_into: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub(crate) struct DirListing {
    pub entries: Vec<DirEntryInfo>,
    pub warnings: Vec<String>,
}

pub fn scan_root(config: &ExportConfig, limits: &ScanLimits) -> Result<RootScan> {
    let root = canonicalize_root(&config.root_path)?;
    log::debug!("Scanning root: {}", root.display());
    let batch = scan_dir(&root, ROOT_KEY, &root, limits)?;
    let node = TreeNode {
        children_count: Some(batch.nodes.len()),
        children: batch.nodes,
        ..TreeNode::unexpanded_root()
    };
    log::info!(
        "Root scan of {} listed {} entries",
        root.display(),
        node.children.len()
    );
    Ok(RootScan {
        root: node,
        warnings: batch.warnings,
    })
}

pub fn scan_children(
    config: &ExportConfig,
    dir_path: &str,
    limits: &ScanLimits,
) -> Result<ScanBatch> {
    let root = canonicalize_root(&config.root_path)?;
    let dir_canon = resolve_dir_under_root(&root, dir_path)?;
    let dir_rel = requested_key(&root, dir_path)
        .or_else(|| relative_unix_path(&root, &dir_canon))
        .unwrap_or_else(|| ROOT_KEY.to_string());
    let depth = if dir_rel == ROOT_KEY {
        0
    } else {
        dir_rel.split('/').count()
    };
    if depth >= limits.max_depth {
        log::warn!("Depth limit reached at '{}'", dir_rel);
        return Ok(ScanBatch {
            nodes: Vec::new(),
            warnings: vec![depth_limit_warning(limits.max_depth, &dir_rel)],
        });
    }
    log::debug!("Scanning children of '{}'", dir_rel);
    scan_dir(&root, &dir_rel, &dir_canon, limits)
}

fn scan_dir(root: &Path, dir_rel: &str, dir_canon: &Path, limits: &ScanLimits) -> Result<ScanBatch> {
    // Ignore status is reported regardless of `useGitignore`; the resolver
    // decides whether it applies.
    let matcher = RuleMatcher::ignore_only(root);
    let ancestors = canonical_ancestors(root, dir_canon);
    let listing = read_dir_entries(root, dir_rel, dir_canon, &ancestors, limits)?;

    let annotated: Vec<(TreeNode, Option<String>)> = listing
        .entries
        .par_iter()
        .map(|entry| {
            let (children_count, warning) = match (&entry.descend_into, entry.is_dir) {
                (Some(target), true) => match count_entries(target, limits.max_entries_per_dir) {
                    Ok(count) => (Some(count), None),
                    Err(e) => {
                        log::warn!("Failed to read directory '{}': {}", entry.rel, e);
                        (
                            None,
                            Some(format!("Failed to read directory '{}': {}", entry.rel, e)),
                        )
                    }
                },
                (None, true) => (Some(0), None),
                _ => (None, None),
            };
            let node = TreeNode {
                path: entry.rel.clone(),
                name: entry.name.clone(),
                is_dir: entry.is_dir,
                children_count,
                ignored_by_gitignore: matcher.matches_ignore(&entry.rel, entry.is_dir),
                size: entry.size,
                children: Vec::new(),
            };
            (node, warning)
        })
        .collect();

    let mut warnings = listing.warnings;
    let mut nodes = Vec::with_capacity(annotated.len());
    for (node, warning) in annotated {
        warnings.extend(warning);
        nodes.push(node);
    }
    warnings.extend(matcher.warnings());
    Ok(ScanBatch { nodes, warnings })
}

/// Lists one directory level, sorted directories first then by
/// case-insensitive name. `.git` is never listed. Failing to open the
/// directory itself is an error; a bad entry only produces a warning.
pub(crate) fn read_dir_entries(
    root: &Path,
    dir_rel: &str,
    dir_canon: &Path,
    ancestors: &[PathBuf],
    limits: &ScanLimits,
) -> Result<DirListing> {
    let read_dir = fs::read_dir(dir_canon)
        .map_err(|e| AppError::read("Failed to read directory", dir_canon, e))?;
    let mut listing = DirListing::default();

    for entry_result in read_dir {
        if listing.entries.len() >= limits.max_entries_per_dir {
            log::warn!("Entry limit reached in '{}'", dir_rel);
            listing.warnings.push(format!(
                "Directory '{}' has more than {} entries; the rest were not listed",
                dir_rel, limits.max_entries_per_dir
            ));
            break;
        }
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                listing
                    .warnings
                    .push(format!("Failed to read an entry of '{}': {}", dir_rel, e));
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if is_skipped_name(&name) {
            log::trace!("Skipping {} in '{}'", name, dir_rel);
            continue;
        }
        let rel = join_rel(dir_rel, &name);
        let path = entry.path();

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                listing.warnings.push(format!("Failed to stat '{}': {}", rel, e));
                listing.entries.push(unknown_file(name, rel));
                continue;
            }
        };

        if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    let descend_into = symlink_target(root, &path, &rel, ancestors, &mut listing.warnings);
                    listing.entries.push(DirEntryInfo {
                        name,
                        rel,
                        is_dir: true,
                        size: None,
                        descend_into,
                    });
                }
                Ok(meta) if meta.is_file() => listing.entries.push(DirEntryInfo {
                    name,
                    rel,
                    is_dir: false,
                    size: Some(meta.len()),
                    descend_into: None,
                }),
                Ok(_) => {
                    log::debug!("Skipping special file behind symlink: {}", rel);
                }
                Err(e) => {
                    log::warn!("Broken symlink '{}': {}", rel, e);
                    listing
                        .warnings
                        .push(format!("Broken symlink '{}': {}", rel, e));
                    listing.entries.push(unknown_file(name, rel));
                }
            }
        } else if file_type.is_dir() {
            listing.entries.push(DirEntryInfo {
                descend_into: Some(dir_canon.join(&name)),
                name,
                rel,
                is_dir: true,
                size: None,
            });
        } else if file_type.is_file() {
            let size = match entry.metadata() {
                Ok(meta) => Some(meta.len()),
                Err(e) => {
                    listing.warnings.push(format!("Failed to stat '{}': {}", rel, e));
                    None
                }
            };
            listing.entries.push(DirEntryInfo {
                name,
                rel,
                is_dir: false,
                size,
                descend_into: None,
            });
        } else {
            log::debug!("Skipping special file: {}", rel);
        }
    }

    listing
        .entries
        .sort_by(|a, b| compare_entries(&a.name, a.is_dir, &b.name, b.is_dir));
    log::trace!("Listed {} entries in '{}'", listing.entries.len(), dir_rel);
    Ok(listing)
}

pub(crate) fn depth_limit_warning(max_depth: usize, dir_rel: &str) -> String {
    format!(
        "Depth limit ({}) reached at '{}'; its contents were not resolved",
        max_depth, dir_rel
    )
}

/// Canonical paths of `dir_canon` and its ancestors up to the root.
pub(crate) fn canonical_ancestors(root: &Path, dir_canon: &Path) -> Vec<PathBuf> {
    let mut chain: Vec<PathBuf> = dir_canon
        .ancestors()
        .take_while(|p| p.starts_with(root))
        .map(Path::to_path_buf)
        .collect();
    chain.reverse();
    chain
}

fn symlink_target(
    root: &Path,
    link: &Path,
    rel: &str,
    ancestors: &[PathBuf],
    warnings: &mut Vec<String>,
) -> Option<PathBuf> {
    let target = match fs::canonicalize(link) {
        Ok(target) => target,
        Err(e) => {
            warnings.push(format!("Failed to resolve symlink '{}': {}", rel, e));
            return None;
        }
    };
    if !target.starts_with(root) {
        log::warn!("Not descending into '{}': target is outside the root", rel);
        warnings.push(format!(
            "Symlinked directory '{}' points outside the root and was not descended",
            rel
        ));
        return None;
    }
    if ancestors.iter().any(|a| a == &target) {
        log::warn!("Not descending into '{}': symlink cycle", rel);
        warnings.push(format!(
            "Symlinked directory '{}' forms a cycle and was not descended",
            rel
        ));
        return None;
    }
    Some(target)
}

fn unknown_file(name: String, rel: String) -> DirEntryInfo {
    DirEntryInfo {
        name,
        rel,
        is_dir: false,
        size: None,
        descend_into: None,
    }
}

fn count_entries(dir: &Path, cap: usize) -> io::Result<usize> {
    Ok(fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| !is_skipped_name(&entry.file_name().to_string_lossy()))
        .take(cap)
        .count())
}

/// Key of the directory as the caller named it, so a listing reached through
/// a symlink keeps the link's path. `None` for absolute paths outside a
/// lexical root prefix.
fn requested_key(root: &Path, dir_path: &str) -> Option<String> {
    let candidate = Path::new(dir_path.trim());
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).ok()?
    } else {
        candidate
    };
    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    let key = normalize_key(&parts.join("/"));
    if key.is_empty() {
        Some(ROOT_KEY.to_string())
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_for(root: &Path) -> ExportConfig {
        ExportConfig::new(root.to_string_lossy())
    }

    #[test]
    fn root_scan_lists_one_level_sorted_and_skips_git() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("Assets")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("b.txt"), "bb").unwrap();
        fs::write(root.join("A.txt"), "a").unwrap();

        let scan = scan_root(&config_for(root), &ScanLimits::default()).unwrap();
        let paths: Vec<&str> = scan.root.children.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["Assets", "src", "A.txt", "b.txt"]);
        assert_eq!(scan.root.path, ".");
        assert_eq!(scan.root.children_count, Some(4));

        let src = &scan.root.children[1];
        assert!(src.is_dir);
        assert_eq!(src.children_count, Some(2));
        assert!(src.children.is_empty());
        assert_eq!(scan.root.children[0].children_count, Some(0));
        assert_eq!(scan.root.children[3].size, Some(2));
    }

    #[test]
    fn ignore_status_is_reported_even_when_gitignore_is_disabled() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join(".gitignore"), "b/\n").unwrap();
        fs::write(root.join("a.txt"), "0123456789").unwrap();

        let mut config = config_for(root);
        config.use_gitignore = false;
        let scan = scan_root(&config, &ScanLimits::default()).unwrap();
        let b = scan.root.children.iter().find(|n| n.path == "b").unwrap();
        assert!(b.ignored_by_gitignore);
        let a = scan.root.children.iter().find(|n| n.path == "a.txt").unwrap();
        assert!(!a.ignored_by_gitignore);
    }

    #[test]
    fn scan_children_uses_relative_keys_and_rejects_escapes() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("src/lib")).unwrap();
        fs::create_dir_all(dir.path().join("outside")).unwrap();
        fs::write(root.join("src/lib/mod.rs"), "").unwrap();

        let config = config_for(&root);
        let batch = scan_children(&config, "src", &ScanLimits::default()).unwrap();
        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.nodes[0].path, "src/lib");

        let nested = scan_children(&config, "./src/lib/", &ScanLimits::default()).unwrap();
        assert_eq!(nested.nodes[0].path, "src/lib/mod.rs");

        let err = scan_children(&config, "../outside", &ScanLimits::default()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::PathOutsideRoot);
        let err = scan_children(&config, "src/lib/mod.rs", &ScanLimits::default()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DirPathNotDir);
    }

    #[test]
    fn entry_limit_truncates_listing_with_warning() {
        let dir = tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let limits = ScanLimits {
            max_entries_per_dir: 2,
            ..ScanLimits::default()
        };
        let scan = scan_root(&config_for(dir.path()), &limits).unwrap();
        assert_eq!(scan.root.children.len(), 2);
        assert_eq!(scan.warnings.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_take_target_type_and_never_loop() {
        use std::os::unix::fs::symlink;
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("real")).unwrap();
        fs::write(root.join("real/file.txt"), "hello").unwrap();
        symlink(root.join("real"), root.join("alias")).unwrap();
        symlink(root, root.join("real/loop")).unwrap();
        symlink(outside.path(), root.join("escape")).unwrap();
        symlink(root.join("missing"), root.join("dangling")).unwrap();

        let config = config_for(root);
        let scan = scan_root(&config, &ScanLimits::default()).unwrap();
        let find = |p: &str| scan.root.children.iter().find(|n| n.path == p).unwrap().clone();
        assert!(find("alias").is_dir);
        assert_eq!(find("alias").children_count, Some(2));
        assert_eq!(find("escape").children_count, Some(0));
        let dangling = find("dangling");
        assert!(!dangling.is_dir);
        assert_eq!(dangling.size, None);
        assert!(scan.warnings.iter().any(|w| w.contains("dangling")));
        assert!(scan.warnings.iter().any(|w| w.contains("escape")));

        let through_link = scan_children(&config, "alias", &ScanLimits::default()).unwrap();
        let loop_node = through_link
            .nodes
            .iter()
            .find(|n| n.path == "alias/loop")
            .unwrap();
        assert!(loop_node.is_dir);
        assert_eq!(loop_node.children_count, Some(0));
    }

    #[test]
    fn requested_key_normalizes_lexically() {
        let root = Path::new("/repo");
        assert_eq!(requested_key(root, "src/../docs").as_deref(), Some("docs"));
        assert_eq!(requested_key(root, "/repo/src").as_deref(), Some("src"));
        assert_eq!(requested_key(root, ".").as_deref(), Some("."));
        assert_eq!(requested_key(root, "/elsewhere"), None);
    }

    #[test]
    fn scan_children_stops_at_depth_limit() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::write(dir.path().join("a/b/c/deep.txt"), "deep").unwrap();
        let config = config_for(dir.path());
        let limits = ScanLimits {
            max_depth: 2,
            ..ScanLimits::default()
        };

        let shallow = scan_children(&config, "a", &limits).unwrap();
        assert_eq!(shallow.nodes.len(), 1);
        assert!(shallow.warnings.is_empty());

        let deep = scan_children(&config, "a/b", &limits).unwrap();
        assert!(deep.nodes.is_empty());
        assert_eq!(
            deep.warnings,
            vec!["Depth limit (2) reached at 'a/b'; its contents were not resolved".to_string()]
        );
    }

    #[test]
    fn count_entries_reports_unreadable_directories() {
        let dir = tempdir().unwrap();
        assert!(count_entries(&dir.path().join("vanished"), 10).is_err());
        fs::write(dir.path().join("x"), "x").unwrap();
        assert_eq!(count_entries(dir.path(), 10).unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_child_directory_becomes_a_warning() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(dir.path().join("ok.txt"), "ok").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let denied = fs::read_dir(&locked).is_err();

        let scan = scan_root(&config_for(dir.path()), &ScanLimits::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        // Privileged users can read the directory anyway.
        if !denied {
            return;
        }

        let scan = scan.unwrap();
        let node = scan.root.children.iter().find(|n| n.path == "locked").unwrap();
        assert_eq!(node.children_count, None);
        assert!(
            scan.warnings
                .iter()
                .any(|w| w.starts_with("Failed to read directory 'locked'"))
        );
        assert_eq!(scan.root.children.len(), 2);
    }
}
