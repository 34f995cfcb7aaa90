use crate::cli_args::ScanArgs;
use crate::load_config_for_command;
use crate::output;
use anyhow::{Context, Result};
use log;
use serde::Serialize;
use xbundle_core::{self as core, ExportConfig, ScanLimits, TreeNode};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanOutput {
    path: String,
    nodes: Vec<TreeNode>,
    warnings: Vec<String>,
}

pub fn handle_scan_command(args: ScanArgs, quiet: bool) -> Result<()> {
    let project_root = ExportConfig::determine_project_root(args.project_config.root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    let (config, limits) = load_config_for_command(&project_root, &args.project_config, None)
        .context("Failed to load configuration for scan command")?;

    let (path, mut nodes, mut warnings) = match args.dir.as_deref() {
        None => {
            let scan = core::scan_root(&config, &limits)?;
            (".".to_string(), scan.root.children, scan.warnings)
        }
        Some(dir) => {
            let batch = core::scan_children(&config, dir, &limits)?;
            (dir.to_string(), batch.nodes, batch.warnings)
        }
    };

    if args.depth > 0 {
        expand_nodes(&config, &limits, &mut nodes, args.depth, &mut warnings)?;
    }

    if args.format_output.json {
        return output::print_json(&ScanOutput {
            path,
            nodes,
            warnings,
        });
    }

    output::print_tree(&format!("Contents of {}", path), &nodes);
    output::print_warnings(&warnings, quiet);
    Ok(())
}

/// Fetches children of listed directories, `levels` deep, the same way an
/// interactive client would expand them one at a time.
fn expand_nodes(
    config: &ExportConfig,
    limits: &ScanLimits,
    nodes: &mut [TreeNode],
    levels: usize,
    warnings: &mut Vec<String>,
) -> Result<()> {
    if levels == 0 {
        return Ok(());
    }
    for node in nodes.iter_mut() {
        if !node.is_dir || node.children_count == Some(0) {
            continue;
        }
        log::trace!("Expanding '{}'", node.path);
        let batch = core::scan_children(config, &node.path, limits)
            .with_context(|| format!("Failed to list '{}'", node.path))?;
        for warning in batch.warnings {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
        node.children = batch.nodes;
        expand_nodes(config, limits, &mut node.children, levels - 1, warnings)?;
    }
    Ok(())
}
