use crate::error::{AppError, Result};
use crate::paths::normalize_key;
use log;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_DIR: &str = ".xtools/xbundle";
pub const DEFAULT_CONFIG_FILENAME: &str = "xbundle.toml";
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 256;
pub const DEFAULT_MAX_ENTRIES_PER_DIR: usize = 100_000;
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// The single configuration object driving every engine operation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_path: String,
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(
        rename = "maxFileSizeKB",
        alias = "maxFileSizeKb",
        default = "default_max_file_size_kb"
    )]
    pub max_file_size_kb: u64,
    #[serde(default)]
    pub large_file_strategy: LargeFileStrategy,
    #[serde(default)]
    pub output_format: OutputFormat,
    // Kept last so TOML serialization emits it as a trailing table.
    #[serde(default)]
    pub manual_selections: BTreeMap<String, ManualSelection>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LargeFileStrategy {
    #[default]
    Truncate,
    Skip,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManualSelection {
    Include,
    Exclude,
    Inherit,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Txt,
    Md,
}

/// Bounds on a single directory listing and on full traversal depth.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScanLimits {
    #[serde(default = "default_max_entries_per_dir")]
    pub max_entries_per_dir: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// On-disk project file: `[export]` and `[limits]` tables.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub limits: ScanLimits,
}

fn default_true() -> bool {
    true
}
fn default_max_file_size_kb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_KB
}
fn default_max_entries_per_dir() -> usize {
    DEFAULT_MAX_ENTRIES_PER_DIR
}
fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            root_path: String::new(),
            use_gitignore: default_true(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            include_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            max_file_size_kb: default_max_file_size_kb(),
            large_file_strategy: LargeFileStrategy::default(),
            output_format: OutputFormat::default(),
            manual_selections: BTreeMap::new(),
        }
    }
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_entries_per_dir: default_max_entries_per_dir(),
            max_depth: default_max_depth(),
        }
    }
}

impl ExportConfig {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// Size cap in bytes derived from `maxFileSizeKB`.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_kb.saturating_mul(1024)
    }

    /// Returns a copy with normalized manual selection keys and `inherit`
    /// entries dropped. Fails when the root itself carries an override or
    /// the size threshold is zero.
    pub fn validated(&self) -> Result<Self> {
        if self.max_file_size_kb == 0 {
            return Err(AppError::Config(
                "maxFileSizeKB must be a positive integer".to_string(),
            ));
        }
        let mut manual_selections = BTreeMap::new();
        for (raw_key, state) in &self.manual_selections {
            let key = normalize_key(raw_key);
            if key.is_empty() || key == "." {
                return Err(AppError::Config(format!(
                    "manualSelections may not hold an override for the root (key \"{}\")",
                    raw_key
                )));
            }
            if *state == ManualSelection::Inherit {
                log::trace!("Dropping inherit selection for {}", key);
                continue;
            }
            manual_selections.insert(key, *state);
        }
        Ok(Self {
            manual_selections,
            ..self.clone()
        })
    }

    pub fn set_manual(&mut self, path: &str, state: ManualSelection) {
        let key = normalize_key(path);
        match state {
            ManualSelection::Inherit => {
                self.manual_selections.remove(&key);
            }
            _ => {
                self.manual_selections.insert(key, state);
            }
        }
    }

    pub fn determine_project_root(cli_project_root: Option<&PathBuf>) -> Result<PathBuf> {
        let path_str_opt = cli_project_root
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| env::var("PROJECT_ROOT").ok().filter(|s| !s.is_empty()));

        let path_to_resolve = match path_str_opt {
            Some(p_str) => PathBuf::from(shellexpand::tilde(&p_str).as_ref()),
            None => env::current_dir().map_err(|e| AppError::RootInvalid {
                path: PathBuf::from("."),
                source: e,
            })?,
        };

        path_to_resolve
            .canonicalize()
            .map_err(|e| AppError::RootInvalid {
                path: path_to_resolve.clone(),
                source: e,
            })
    }
}

impl ProjectFile {
    pub fn resolve_path(
        project_root: &Path,
        cli_config_file: Option<&String>,
        cli_disable_config: bool,
    ) -> Result<Option<PathBuf>> {
        if cli_disable_config {
            log::debug!("Config file loading disabled via CLI flag.");
            return Ok(None);
        }

        let path_to_check = match cli_config_file {
            Some(p_str) => {
                let expanded_path_cow = shellexpand::tilde(p_str);
                let mut path = PathBuf::from(expanded_path_cow.as_ref());
                let looks_like_path = path.is_absolute()
                    || path.components().count() > 1
                    || p_str.contains(['/', '\\']);

                if looks_like_path {
                    if !path.exists() && path.extension().is_none() {
                        path.set_extension("toml");
                    }
                    if !path.exists() {
                        return Err(AppError::Config(format!(
                            "Specified config file not found at path: {}",
                            path.display()
                        )));
                    }
                    log::debug!("Using specified config file path: {}", path.display());
                    Some(path)
                } else {
                    let filename = if path.extension().is_none_or(|e| e != "toml") {
                        format!("{}.toml", path.to_string_lossy())
                    } else {
                        path.to_string_lossy().to_string()
                    };
                    let full_path = project_root.join(DEFAULT_CONFIG_DIR).join(filename);
                    if !full_path.exists() {
                        return Err(AppError::Config(format!(
                            "Specified config file '{}' not found in default directory: {}",
                            path.display(),
                            project_root.join(DEFAULT_CONFIG_DIR).display()
                        )));
                    }
                    log::debug!(
                        "Using specified config filename in default directory: {}",
                        full_path.display()
                    );
                    Some(full_path)
                }
            }
            None => {
                let default_path = Self::default_path(project_root);
                if default_path.exists() {
                    log::debug!("Using default config file path: {}", default_path.display());
                    Some(default_path)
                } else {
                    log::debug!(
                        "No config file specified and default not found at: {}",
                        default_path.display()
                    );
                    None
                }
            }
        };
        Ok(path_to_check)
    }

    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILENAME)
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        log::info!("Loading configuration from: {}", config_path.display());
        let toml_content = fs::read_to_string(config_path)
            .map_err(|e| AppError::read("Failed to read config file", config_path, e))?;
        toml::from_str::<ProjectFile>(&toml_content).map_err(|e| {
            AppError::Config(format!(
                "Error parsing config file '{}': {}. Check TOML syntax and structure.",
                config_path.display(),
                e
            ))
        })
    }

    /// Default document shown by `xbundle config`; the root is supplied at run time.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&ProjectFile::default())
            .map_err(|e| AppError::Config(format!("Failed to serialize default config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(size_key: &str, size: u64) -> serde_json::Value {
        json!({
            "rootPath": "/repo",
            "useGitignore": true,
            "includeGlobs": [],
            "excludeGlobs": [],
            "includeExtensions": [],
            "excludeExtensions": [],
            size_key: size,
            "largeFileStrategy": "skip",
            "manualSelections": { "src": "exclude", "src/main.rs": "include" },
            "outputFormat": "md"
        })
    }

    #[test]
    fn accepts_uppercase_and_legacy_size_keys() {
        let upper: ExportConfig = serde_json::from_value(payload("maxFileSizeKB", 256)).unwrap();
        let legacy: ExportConfig = serde_json::from_value(payload("maxFileSizeKb", 128)).unwrap();
        assert_eq!(upper.max_file_size_kb, 256);
        assert_eq!(legacy.max_file_size_kb, 128);
        assert_eq!(upper.large_file_strategy, LargeFileStrategy::Skip);
        assert_eq!(upper.output_format, OutputFormat::Md);
    }

    #[test]
    fn serializes_size_key_in_uppercase() {
        let value = serde_json::to_value(ExportConfig::new("/repo")).unwrap();
        assert_eq!(value["maxFileSizeKB"], json!(DEFAULT_MAX_FILE_SIZE_KB));
        assert_eq!(value["largeFileStrategy"], json!("truncate"));
    }

    #[test]
    fn validated_normalizes_keys_and_drops_inherit() {
        let mut config = ExportConfig::new("/repo");
        config
            .manual_selections
            .insert("./src\\lib/".to_string(), ManualSelection::Exclude);
        config
            .manual_selections
            .insert("docs".to_string(), ManualSelection::Inherit);
        let validated = config.validated().unwrap();
        assert_eq!(
            validated.manual_selections.get("src/lib"),
            Some(&ManualSelection::Exclude)
        );
        assert!(!validated.manual_selections.contains_key("docs"));
    }

    #[test]
    fn validated_rejects_root_override() {
        let mut config = ExportConfig::new("/repo");
        config
            .manual_selections
            .insert(".".to_string(), ManualSelection::Include);
        let err = config.validated().unwrap_err();
        assert!(err.to_string().starts_with("[E_CONFIG]"));
    }

    #[test]
    fn validated_rejects_zero_size_threshold() {
        let mut config = ExportConfig::new("/repo");
        config.max_file_size_kb = 0;
        assert!(config.validated().is_err());
    }

    #[test]
    fn project_file_round_trips_through_default_toml() {
        let text = ProjectFile::default_toml().unwrap();
        let parsed: ProjectFile = toml::from_str(&text).unwrap();
        assert_eq!(parsed, ProjectFile::default());
    }

    #[test]
    fn project_file_reads_partial_tables() {
        let parsed: ProjectFile = toml::from_str(
            "[export]\nexcludeGlobs = [\"target/\"]\nlargeFileStrategy = \"skip\"\n\n[limits]\nmaxDepth = 8\n",
        )
        .unwrap();
        assert_eq!(parsed.export.exclude_globs, vec!["target/".to_string()]);
        assert_eq!(parsed.export.large_file_strategy, LargeFileStrategy::Skip);
        assert_eq!(parsed.limits.max_depth, 8);
        assert_eq!(parsed.limits.max_entries_per_dir, DEFAULT_MAX_ENTRIES_PER_DIR);
    }
}
