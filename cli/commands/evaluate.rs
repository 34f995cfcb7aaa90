use crate::cli_args::EvaluateArgs;
use crate::load_config_for_command;
use crate::output;
use anyhow::{Context, Result};
use log;
use xbundle_core::{self as core, ExportConfig};

pub fn handle_evaluate_command(args: EvaluateArgs, quiet: bool) -> Result<()> {
    let project_root = ExportConfig::determine_project_root(args.project_config.root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    let (config, limits) =
        load_config_for_command(&project_root, &args.project_config, Some(&args.selection))
            .context("Failed to load configuration for evaluate command")?;

    if args.list {
        let selection = core::resolve_selection(&config, None, &limits, None)?;
        if args.format_output.json {
            return output::print_json(&selection);
        }
        output::print_selection_table(&selection);
        output::print_summary(&selection.summary());
        output::print_warnings(&selection.warnings, quiet);
        return Ok(());
    }

    let summary = core::evaluate(&config, None, &limits)?;
    if args.format_output.json {
        return output::print_json(&summary);
    }
    output::print_summary(&summary);
    output::print_warnings(&summary.warnings, quiet);
    Ok(())
}
