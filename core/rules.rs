//! Per-path rule matching: nested `.gitignore` files plus the glob and
//! extension lists from [`ExportConfig`].

use crate::config::ExportConfig;
use crate::error::{AppError, Result};
use crate::paths::{ROOT_KEY, abs_path, parent_key};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const GITIGNORE_FILENAME: &str = ".gitignore";
const DIR_MATCH_PROBE: &str = "dummy_file_for_dir_match";

/// Classification of a path by the glob/extension configuration alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVerdict {
    Include,
    Exclude,
    Neutral,
}

pub struct RuleMatcher {
    include_set: GlobSet,
    has_include_globs: bool,
    exclude_set: GlobSet,
    include_ext: Vec<String>,
    exclude_ext: Vec<String>,
    gitignores: GitignoreCache,
}

impl RuleMatcher {
    /// Compiles every configured pattern up front; an invalid glob fails the
    /// whole call before any scanning happens.
    pub fn from_config(root: &Path, config: &ExportConfig) -> Result<Self> {
        log::trace!("Building rule matcher for {}", root.display());
        Ok(Self {
            include_set: build_glob_set_from_vec(&config.include_globs)?,
            has_include_globs: !config.include_globs.is_empty(),
            exclude_set: build_glob_set_from_vec(&config.exclude_globs)?,
            include_ext: normalize_extensions(&config.include_extensions),
            exclude_ext: normalize_extensions(&config.exclude_extensions),
            gitignores: GitignoreCache::new(root),
        })
    }

    /// Matcher that only answers ignore-file questions.
    pub fn ignore_only(root: &Path) -> Self {
        Self {
            include_set: GlobSet::empty(),
            has_include_globs: false,
            exclude_set: GlobSet::empty(),
            include_ext: Vec::new(),
            exclude_ext: Vec::new(),
            gitignores: GitignoreCache::new(root),
        }
    }

    /// Whether nested `.gitignore` files exclude `rel`. A path inside an
    /// ignored directory is ignored as well.
    pub fn matches_ignore(&self, rel: &str, is_dir: bool) -> bool {
        if rel == ROOT_KEY {
            return false;
        }
        if is_dir {
            return self.gitignores.directory_ignored(rel);
        }
        self.gitignores.directory_ignored(parent_key(rel)) || self.gitignores.ignored_here(rel, false)
    }

    pub fn matches_rules(&self, rel: &str, is_dir: bool) -> RuleVerdict {
        if rel == ROOT_KEY {
            return RuleVerdict::Neutral;
        }
        let path = Path::new(rel);

        if self.exclude_set.is_match(path) || (is_dir && self.exclude_set.is_match(path.join(DIR_MATCH_PROBE))) {
            log::trace!("Path excluded by exclude globs: {}", rel);
            return RuleVerdict::Exclude;
        }
        if is_dir {
            if self.has_include_globs && self.include_set.is_match(path) {
                return RuleVerdict::Include;
            }
            // Allow-lists describe files; directories stay neutral.
            return RuleVerdict::Neutral;
        }

        let lower_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if self.exclude_ext.iter().any(|ext| lower_name.ends_with(ext.as_str())) {
            log::trace!("Path excluded by exclude extensions: {}", rel);
            return RuleVerdict::Exclude;
        }

        let has_allow_list = self.has_include_globs || !self.include_ext.is_empty();
        if !has_allow_list {
            return RuleVerdict::Neutral;
        }
        let glob_hit = self.has_include_globs && self.include_set.is_match(path);
        let ext_hit = self.include_ext.iter().any(|ext| lower_name.ends_with(ext.as_str()));
        if glob_hit || ext_hit {
            RuleVerdict::Include
        } else {
            log::trace!("Path not matched by any include list: {}", rel);
            RuleVerdict::Exclude
        }
    }

    /// Warnings collected while parsing ignore files so far.
    pub fn warnings(&self) -> Vec<String> {
        self.gitignores.warnings()
    }
}

fn build_glob_set_from_vec(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern_str in patterns {
        let mut processed_pattern = pattern_str.trim().to_string();
        if processed_pattern.ends_with('/') && processed_pattern.len() > 1 {
            processed_pattern.push_str("**");
        }
        match Glob::new(&processed_pattern) {
            Ok(glob) => {
                log::trace!(
                    "Adding glob pattern: {} (processed as {})",
                    pattern_str,
                    processed_pattern
                );
                builder.add(glob);
            }
            Err(e) => {
                log::error!("Invalid glob pattern \"{}\": {}", pattern_str, e);
                return Err(AppError::InvalidGlob {
                    pattern: pattern_str.clone(),
                    message: e.kind().to_string(),
                });
            }
        }
    }
    builder.build().map_err(|e| {
        log::error!("Error building glob set: {}", e);
        AppError::from(e)
    })
}

fn normalize_extensions(items: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = items
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty() && v != ".")
        .map(|v| if v.starts_with('.') { v } else { format!(".{}", v) })
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Lazily loaded `.gitignore` matchers keyed by directory, cached for the
/// lifetime of one engine call.
struct GitignoreCache {
    root: PathBuf,
    per_dir: Mutex<HashMap<String, Option<Arc<Gitignore>>>>,
    dir_ignored: Mutex<HashMap<String, bool>>,
    warnings: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GitignoreCache {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            per_dir: Mutex::new(HashMap::new()),
            dir_ignored: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    fn warnings(&self) -> Vec<String> {
        locked(&self.warnings).clone()
    }

    fn for_dir(&self, dir_rel: &str) -> Option<Arc<Gitignore>> {
        if let Some(hit) = locked(&self.per_dir).get(dir_rel) {
            return hit.clone();
        }
        let loaded = self.load(dir_rel);
        locked(&self.per_dir)
            .entry(dir_rel.to_string())
            .or_insert(loaded)
            .clone()
    }

    fn load(&self, dir_rel: &str) -> Option<Arc<Gitignore>> {
        let dir_abs = abs_path(&self.root, dir_rel);
        let file = dir_abs.join(GITIGNORE_FILENAME);
        if !file.is_file() {
            return None;
        }
        log::debug!("Loading ignore file: {}", file.display());
        let mut builder = GitignoreBuilder::new(&dir_abs);
        if let Some(err) = builder.add(&file) {
            log::warn!("Partial .gitignore parse error in {}: {}", file.display(), err);
            locked(&self.warnings).push(format!(
                "Partial .gitignore parse error in {}: {}",
                join_display(dir_rel),
                err
            ));
        }
        match builder.build() {
            Ok(matcher) => Some(Arc::new(matcher)),
            Err(err) => {
                log::warn!("Failed to build .gitignore matcher for {}: {}", file.display(), err);
                locked(&self.warnings).push(format!(
                    "Failed to build .gitignore matcher for {}: {}",
                    join_display(dir_rel),
                    err
                ));
                None
            }
        }
    }

    /// Consults ignore files from the nearest directory upward; the first
    /// file with an opinion decides.
    fn ignored_here(&self, rel: &str, is_dir: bool) -> bool {
        let abs = abs_path(&self.root, rel);
        let mut dir = parent_key(rel);
        loop {
            if let Some(matcher) = self.for_dir(dir) {
                match matcher.matched(&abs, is_dir) {
                    Match::Ignore(glob) => {
                        log::trace!("{} ignored by pattern '{}'", rel, glob.original());
                        return true;
                    }
                    Match::Whitelist(_) => return false,
                    Match::None => {}
                }
            }
            if dir == ROOT_KEY {
                return false;
            }
            dir = parent_key(dir);
        }
    }

    fn directory_ignored(&self, dir_rel: &str) -> bool {
        if dir_rel == ROOT_KEY {
            return false;
        }
        if let Some(hit) = locked(&self.dir_ignored).get(dir_rel) {
            return *hit;
        }
        let ignored =
            self.directory_ignored(parent_key(dir_rel)) || self.ignored_here(dir_rel, true);
        locked(&self.dir_ignored).insert(dir_rel.to_string(), ignored);
        ignored
    }
}

fn join_display(dir_rel: &str) -> String {
    if dir_rel == ROOT_KEY {
        GITIGNORE_FILENAME.to_string()
    } else {
        format!("{}/{}", dir_rel, GITIGNORE_FILENAME)
    }
}
