//! Effective inclusion state for every file reachable from the root.
//!
//! Precedence at each node: the node's own manual override, then the nearest
//! ancestor override (or an exclusion carried down from an excluded
//! directory), then `.gitignore` when enabled, then the glob/extension
//! verdict, defaulting to included. Oversize files are flagged afterwards and
//! forced out under the `skip` strategy.

use crate::cancel::CancellationToken;
use crate::config::{ExportConfig, LargeFileStrategy, ManualSelection, ScanLimits};
use crate::error::Result;
use crate::paths::{ROOT_KEY, abs_path, canonicalize_root};
use crate::rules::{RuleMatcher, RuleVerdict};
use crate::scanner::{canonical_ancestors, depth_limit_warning, read_dir_entries};
use crate::tree::KnownTree;
use indexmap::IndexMap;
use log;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// The path carries its own manual override.
    Manual,
    /// Inherited from the nearest ancestor with a manual override.
    Inherited { from: String },
    Gitignore,
    Rule,
    Default,
    /// Forced out by the `skip` large-file strategy.
    Oversize,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Manual => write!(f, "manual"),
            Reason::Inherited { from } => write!(f, "inherited from '{}'", from),
            Reason::Gitignore => write!(f, "gitignore"),
            Reason::Rule => write!(f, "rule"),
            Reason::Default => write!(f, "default"),
            Reason::Oversize => write!(f, "oversize"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResolution {
    pub included: bool,
    pub reason: Reason,
    pub size: Option<u64>,
    pub oversize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirResolution {
    pub included: bool,
    pub reason: Reason,
}

/// State a directory hands down to descendants without their own override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedState {
    pub included: bool,
    pub reason: Reason,
}

/// A known directory whose children were never fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierDir {
    pub path: String,
    pub inherited: Option<InheritedState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSelection {
    /// Every file in scanner order (depth first, directories before files).
    pub files: IndexMap<String, FileResolution>,
    pub directories: IndexMap<String, DirResolution>,
    pub frontier: Vec<FrontierDir>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSummary {
    pub included_files: usize,
    pub excluded_files: usize,
    pub warnings: Vec<String>,
}

impl ResolvedSelection {
    pub fn included_files(&self) -> impl Iterator<Item = (&String, &FileResolution)> {
        self.files.iter().filter(|(_, res)| res.included)
    }

    pub fn summary(&self) -> SelectionSummary {
        let included_files = self.included_files().count();
        SelectionSummary {
            included_files,
            excluded_files: self.files.len() - included_files,
            warnings: self.warnings.clone(),
        }
    }

    fn absorb(&mut self, expansion: Expansion) {
        self.files.extend(expansion.files);
        self.directories.extend(expansion.directories);
        self.warnings.extend(expansion.warnings);
    }

    fn finish(&mut self, extra_warnings: Vec<String>) {
        self.warnings.extend(extra_warnings);
        let mut seen = std::collections::HashSet::new();
        self.warnings.retain(|w| seen.insert(w.clone()));
    }
}

/// Resolves the nodes present in `tree` without touching the filesystem.
/// Unfetched directories are reported in `frontier` with the state their
/// subtree inherits.
pub fn resolve(config: &ExportConfig, tree: &KnownTree) -> Result<ResolvedSelection> {
    let config = config.validated()?;
    let root = PathBuf::from(&config.root_path);
    let matcher = RuleMatcher::from_config(&root, &config)?;
    let resolver = Resolver::new(&root, &config, &matcher);

    let mut selection = ResolvedSelection::default();
    resolver.walk_known(tree, &mut HashMap::new(), &mut selection);
    selection.finish(Vec::new());
    log::debug!(
        "Resolved {} known files, {} unfetched directories",
        selection.files.len(),
        selection.frontier.len()
    );
    Ok(selection)
}

/// Resolves the whole tree under the root: known nodes as in [`resolve`],
/// frontier directories expanded through stat-only listings in parallel.
/// When `cancel` fires, expansion stops early and the partial result is
/// returned; callers check the token.
pub fn resolve_full(
    config: &ExportConfig,
    tree: &KnownTree,
    limits: &ScanLimits,
    cancel: Option<&CancellationToken>,
) -> Result<ResolvedSelection> {
    let config = config.validated()?;
    let root = canonicalize_root(&config.root_path)?;
    let matcher = RuleMatcher::from_config(&root, &config)?;
    let resolver = Resolver::new(&root, &config, &matcher);

    let mut first_pass = ResolvedSelection::default();
    resolver.walk_known(tree, &mut HashMap::new(), &mut first_pass);
    if first_pass.frontier.is_empty() {
        first_pass.finish(matcher.warnings());
        return Ok(first_pass);
    }

    log::debug!(
        "Expanding {} unfetched directories",
        first_pass.frontier.len()
    );
    let walk = Walk { limits, cancel };
    let mut expansions: HashMap<String, Expansion> = first_pass
        .frontier
        .par_iter()
        .map(|frontier| (frontier.path.clone(), resolver.expand(frontier, &walk)))
        .collect();

    let mut selection = ResolvedSelection::default();
    resolver.walk_known(tree, &mut expansions, &mut selection);
    selection.finish(matcher.warnings());
    log::info!(
        "Resolved {} files ({} included)",
        selection.files.len(),
        selection.included_files().count()
    );
    Ok(selection)
}

struct Decision {
    included: bool,
    reason: Reason,
    inherited: Option<InheritedState>,
}

#[derive(Default)]
struct Expansion {
    files: Vec<(String, FileResolution)>,
    directories: Vec<(String, DirResolution)>,
    warnings: Vec<String>,
}

struct Walk<'a> {
    limits: &'a ScanLimits,
    cancel: Option<&'a CancellationToken>,
}

struct Resolver<'a> {
    root: &'a Path,
    config: &'a ExportConfig,
    matcher: &'a RuleMatcher,
    cap: u64,
}

impl<'a> Resolver<'a> {
    fn new(root: &'a Path, config: &'a ExportConfig, matcher: &'a RuleMatcher) -> Self {
        Self {
            root,
            config,
            matcher,
            cap: config.max_file_bytes(),
        }
    }

    fn decide(
        &self,
        rel: &str,
        is_dir: bool,
        ignored: impl FnOnce() -> bool,
        inherited: Option<&InheritedState>,
    ) -> Decision {
        if let Some(state) = self.config.manual_selections.get(rel) {
            let included = *state == ManualSelection::Include;
            return Decision {
                included,
                reason: Reason::Manual,
                inherited: Some(InheritedState {
                    included,
                    reason: Reason::Inherited {
                        from: rel.to_string(),
                    },
                }),
            };
        }
        if let Some(state) = inherited {
            return Decision {
                included: state.included,
                reason: state.reason.clone(),
                inherited: Some(state.clone()),
            };
        }
        if self.config.use_gitignore && ignored() {
            log::trace!("{} excluded by .gitignore", rel);
            return Decision {
                included: false,
                reason: Reason::Gitignore,
                inherited: Some(InheritedState {
                    included: false,
                    reason: Reason::Gitignore,
                }),
            };
        }
        match self.matcher.matches_rules(rel, is_dir) {
            RuleVerdict::Include => Decision {
                included: true,
                reason: Reason::Rule,
                inherited: None,
            },
            RuleVerdict::Exclude => Decision {
                included: false,
                reason: Reason::Rule,
                inherited: Some(InheritedState {
                    included: false,
                    reason: Reason::Rule,
                }),
            },
            RuleVerdict::Neutral => Decision {
                included: true,
                reason: Reason::Default,
                inherited: None,
            },
        }
    }

    fn resolve_file(
        &self,
        rel: &str,
        size: Option<u64>,
        ignored: impl FnOnce() -> bool,
        inherited: Option<&InheritedState>,
        warnings: &mut Vec<String>,
    ) -> FileResolution {
        let decision = self.decide(rel, false, ignored, inherited);
        let oversize = size.is_some_and(|s| s > self.cap);
        if oversize
            && decision.included
            && self.config.large_file_strategy == LargeFileStrategy::Skip
        {
            warnings.push(format!(
                "Skipping '{}': {} bytes exceeds maxFileSizeKB ({})",
                rel,
                size.unwrap_or_default(),
                self.config.max_file_size_kb
            ));
            return FileResolution {
                included: false,
                reason: Reason::Oversize,
                size,
                oversize,
            };
        }
        FileResolution {
            included: decision.included,
            reason: decision.reason,
            size,
            oversize,
        }
    }

    fn walk_known(
        &self,
        tree: &KnownTree,
        expansions: &mut HashMap<String, Expansion>,
        out: &mut ResolvedSelection,
    ) {
        self.walk_known_dir(tree, ROOT_KEY, None, expansions, out);
    }

    fn walk_known_dir(
        &self,
        tree: &KnownTree,
        dir: &str,
        inherited: Option<&InheritedState>,
        expansions: &mut HashMap<String, Expansion>,
        out: &mut ResolvedSelection,
    ) {
        if !tree.is_expanded(dir) {
            match expansions.remove(dir) {
                Some(expansion) => out.absorb(expansion),
                None => out.frontier.push(FrontierDir {
                    path: dir.to_string(),
                    inherited: inherited.cloned(),
                }),
            }
            return;
        }
        for child in tree.children_of(dir) {
            if child.is_dir {
                let decision =
                    self.decide(&child.path, true, || child.ignored_by_gitignore, inherited);
                out.directories.insert(
                    child.path.clone(),
                    DirResolution {
                        included: decision.included,
                        reason: decision.reason.clone(),
                    },
                );
                self.walk_known_dir(
                    tree,
                    &child.path,
                    decision.inherited.as_ref(),
                    expansions,
                    out,
                );
            } else {
                let resolution = self.resolve_file(
                    &child.path,
                    child.size,
                    || child.ignored_by_gitignore,
                    inherited,
                    &mut out.warnings,
                );
                out.files.insert(child.path.clone(), resolution);
            }
        }
    }

    fn expand(&self, frontier: &FrontierDir, walk: &Walk<'_>) -> Expansion {
        let mut out = Expansion::default();
        let dir_abs = abs_path(self.root, &frontier.path);
        let dir_canon = match fs::canonicalize(&dir_abs) {
            Ok(path) if path.starts_with(self.root) => path,
            Ok(_) => {
                out.warnings.push(format!(
                    "Directory '{}' resolves outside the root and was not descended",
                    frontier.path
                ));
                return out;
            }
            Err(e) => {
                log::warn!("Failed to resolve '{}': {}", frontier.path, e);
                out.warnings
                    .push(format!("Failed to read directory '{}': {}", frontier.path, e));
                return out;
            }
        };
        let mut chain = canonical_ancestors(self.root, &dir_canon);
        let depth = if frontier.path == ROOT_KEY {
            0
        } else {
            frontier.path.split('/').count()
        };
        self.expand_dir(
            &frontier.path,
            &dir_canon,
            frontier.inherited.as_ref(),
            &mut chain,
            depth,
            walk,
            &mut out,
        );
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_dir(
        &self,
        dir_rel: &str,
        dir_canon: &Path,
        inherited: Option<&InheritedState>,
        chain: &mut Vec<PathBuf>,
        depth: usize,
        walk: &Walk<'_>,
        out: &mut Expansion,
    ) {
        if walk.cancel.is_some_and(|token| token.is_cancelled()) {
            return;
        }
        if depth >= walk.limits.max_depth {
            log::warn!("Depth limit reached at '{}'", dir_rel);
            out
                .warnings
                .push(depth_limit_warning(walk.limits.max_depth, dir_rel));
            return;
        }
        let listing = match read_dir_entries(self.root, dir_rel, dir_canon, chain, walk.limits) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("{}", e);
                out.warnings.push(e.to_string());
                return;
            }
        };
        out.warnings.extend(listing.warnings);

        for entry in listing.entries {
            if entry.is_dir {
                let decision = self.decide(
                    &entry.rel,
                    true,
                    || self.matcher.matches_ignore(&entry.rel, true),
                    inherited,
                );
                out.directories.push((
                    entry.rel.clone(),
                    DirResolution {
                        included: decision.included,
                        reason: decision.reason.clone(),
                    },
                ));
                if let Some(target) = entry.descend_into {
                    chain.push(target.clone());
                    self.expand_dir(
                        &entry.rel,
                        &target,
                        decision.inherited.as_ref(),
                        chain,
                        depth + 1,
                        walk,
                        out,
                    );
                    chain.pop();
                }
            } else {
                let resolution = self.resolve_file(
                    &entry.rel,
                    entry.size,
                    || self.matcher.matches_ignore(&entry.rel, false),
                    inherited,
                    &mut out.warnings,
                );
                out.files.push((entry.rel, resolution));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeNode;

    fn node(path: &str, is_dir: bool, size: Option<u64>, ignored: bool) -> TreeNode {
        TreeNode {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            is_dir,
            children_count: None,
            ignored_by_gitignore: ignored,
            size,
            children: Vec::new(),
        }
    }

    fn file(path: &str) -> TreeNode {
        node(path, false, Some(10), false)
    }

    fn dir(path: &str, children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            children_count: Some(children.len()),
            children,
            ..node(path, true, None, false)
        }
    }

    fn known(children: Vec<TreeNode>) -> KnownTree {
        KnownTree::from_root(&dir(".", children))
    }

    fn config() -> ExportConfig {
        ExportConfig::new("/virtual/repo")
    }

    #[test]
    fn nearest_manual_override_wins() {
        let tree = known(vec![dir(
            "a",
            vec![
                dir("a/b", vec![file("a/b/c.txt")]),
                file("a/x.txt"),
                file("a/keep.txt"),
            ],
        )]);
        let mut config = config();
        config.set_manual("a", ManualSelection::Exclude);
        config.set_manual("a/b", ManualSelection::Include);
        config.set_manual("a/keep.txt", ManualSelection::Include);

        let selection = resolve(&config, &tree).unwrap();
        let c = &selection.files["a/b/c.txt"];
        assert!(c.included);
        assert_eq!(
            c.reason,
            Reason::Inherited {
                from: "a/b".to_string()
            }
        );
        assert!(!selection.files["a/x.txt"].included);
        assert_eq!(selection.files["a/keep.txt"].reason, Reason::Manual);
        assert!(selection.files["a/keep.txt"].included);
        assert_eq!(selection.summary().included_files, 2);
        assert_eq!(selection.summary().excluded_files, 1);
    }

    #[test]
    fn gitignore_toggle_only_affects_gitignore_exclusions() {
        let tree = known(vec![
            node("debug.log", false, Some(3), true),
            file("notes.tmp"),
            file("main.rs"),
        ]);
        let mut config = config();
        config.exclude_extensions = vec!["tmp".to_string()];

        let on = resolve(&config, &tree).unwrap();
        assert_eq!(on.files["debug.log"].reason, Reason::Gitignore);
        assert!(!on.files["debug.log"].included);

        config.use_gitignore = false;
        let off = resolve(&config, &tree).unwrap();
        assert!(off.files["debug.log"].included);
        assert_eq!(off.files["debug.log"].reason, Reason::Default);
        assert_eq!(on.files["notes.tmp"], off.files["notes.tmp"]);
        assert_eq!(on.files["main.rs"], off.files["main.rs"]);
    }

    #[test]
    fn excluded_directory_carries_exclusion_to_known_children() {
        let tree = known(vec![dir("build", vec![file("build/out.rs")])]);
        let mut config = config();
        config.exclude_globs = vec!["build".to_string()];

        let selection = resolve(&config, &tree).unwrap();
        assert!(!selection.directories["build"].included);
        assert_eq!(selection.files["build/out.rs"].reason, Reason::Rule);
        assert!(!selection.files["build/out.rs"].included);
    }

    #[test]
    fn unfetched_directories_form_the_frontier() {
        let tree = known(vec![
            TreeNode {
                children_count: Some(3),
                ..node("lazy", true, None, false)
            },
            TreeNode {
                children_count: Some(0),
                ..node("empty", true, None, false)
            },
            file("a.txt"),
        ]);
        let mut config = config();
        config.set_manual("lazy", ManualSelection::Exclude);

        let selection = resolve(&config, &tree).unwrap();
        assert_eq!(selection.frontier.len(), 1);
        assert_eq!(selection.frontier[0].path, "lazy");
        assert_eq!(
            selection.frontier[0].inherited,
            Some(InheritedState {
                included: false,
                reason: Reason::Inherited {
                    from: "lazy".to_string()
                },
            })
        );
        assert_eq!(selection.files.len(), 1);
    }

    #[test]
    fn oversize_files_follow_the_strategy() {
        let tree = known(vec![node("big.bin", false, Some(2048), false), file("small.txt")]);
        let mut config = config();
        config.max_file_size_kb = 1;

        let truncated = resolve(&config, &tree).unwrap();
        assert!(truncated.files["big.bin"].included);
        assert!(truncated.files["big.bin"].oversize);
        assert!(truncated.warnings.is_empty());

        config.large_file_strategy = LargeFileStrategy::Skip;
        let skipped = resolve(&config, &tree).unwrap();
        assert!(!skipped.files["big.bin"].included);
        assert_eq!(skipped.files["big.bin"].reason, Reason::Oversize);
        assert!(skipped.warnings[0].contains("big.bin"));
        assert!(skipped.files["small.txt"].included);
    }

    #[test]
    fn resolution_is_deterministic_and_in_scanner_order() {
        let tree = known(vec![
            dir("src", vec![file("src/lib.rs"), file("src/main.rs")]),
            file("README.md"),
        ]);
        let first = resolve(&config(), &tree).unwrap();
        let second = resolve(&config(), &tree).unwrap();
        assert_eq!(first, second);
        let order: Vec<&str> = first.files.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["src/lib.rs", "src/main.rs", "README.md"]);
    }

    #[test]
    fn invalid_glob_fails_resolution() {
        let tree = known(vec![file("a.txt")]);
        let mut config = config();
        config.include_globs = vec!["{a,b".to_string()];
        let err = resolve(&config, &tree).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RuleInvalidGlob);
    }
}
