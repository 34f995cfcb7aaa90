//! Stateless operation surface. Every call receives the full configuration
//! and, optionally, the caller's tree snapshot.

use crate::config::{ExportConfig, ScanLimits};
use crate::error::{AppError, Result};
use crate::paths::canonicalize_root;
use crate::preview::{self, PreviewMeta};
use crate::resolver::{self, ResolvedSelection, SelectionSummary};
use crate::rules::RuleMatcher;
use crate::scanner;
use crate::tree::KnownTree;
use crate::writer::{self, ExportOptions, ExportResult};
use log;

pub use crate::scanner::{scan_children, scan_root};

/// Resolution shared by evaluate, preview and export. Without a snapshot the
/// root is scanned first so its subdirectories can be expanded in parallel.
pub fn resolve_selection(
    config: &ExportConfig,
    tree: Option<&KnownTree>,
    limits: &ScanLimits,
    options: Option<&ExportOptions>,
) -> Result<ResolvedSelection> {
    let config = config.validated()?;
    let cancel = options.and_then(|o| o.cancel.as_ref());
    match tree {
        Some(tree) => resolver::resolve_full(&config, tree, limits, cancel),
        None => {
            // Bad globs fail before any directory is listed.
            let root = canonicalize_root(&config.root_path)?;
            RuleMatcher::from_config(&root, &config)?;
            let scan = scanner::scan_root(&config, limits)?;
            let tree = KnownTree::from_root(&scan.root);
            let mut selection = resolver::resolve_full(&config, &tree, limits, cancel)?;
            let mut warnings = scan.warnings;
            warnings.retain(|w| !selection.warnings.contains(w));
            warnings.append(&mut selection.warnings);
            selection.warnings = warnings;
            Ok(selection)
        }
    }
}

pub fn evaluate(
    config: &ExportConfig,
    tree: Option<&KnownTree>,
    limits: &ScanLimits,
) -> Result<SelectionSummary> {
    let summary = resolve_selection(config, tree, limits, None)?.summary();
    log::info!(
        "Evaluate: {} included, {} excluded",
        summary.included_files,
        summary.excluded_files
    );
    Ok(summary)
}

pub fn preview(
    config: &ExportConfig,
    tree: Option<&KnownTree>,
    limits: &ScanLimits,
) -> Result<PreviewMeta> {
    let config = config.validated()?;
    let selection = resolve_selection(&config, tree, limits, None)?;
    Ok(preview::estimate(&config, &selection))
}

/// Validates the destination, resolves the full tree and writes the
/// artifact. Cancellation before the first byte leaves no file behind.
pub fn export(
    config: &ExportConfig,
    tree: Option<&KnownTree>,
    output_path: &str,
    options: &ExportOptions,
    limits: &ScanLimits,
) -> Result<ExportResult> {
    let config = config.validated()?;
    let path = writer::validate_output_path(output_path, options.overwrite)?;
    let selection = resolve_selection(&config, tree, limits, Some(options))?;
    if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
        log::warn!("Export cancelled during resolution");
        return Err(AppError::ExportCancelled {
            path,
            exported_files: 0,
            output_left: false,
        });
    }
    writer::write(&config, &selection, output_path, options)
}
