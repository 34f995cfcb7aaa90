use crate::cli_args::PreviewArgs;
use crate::load_config_for_command;
use crate::output;
use anyhow::{Context, Result};
use log;
use xbundle_core::{self as core, ExportConfig};

pub fn handle_preview_command(args: PreviewArgs, quiet: bool) -> Result<()> {
    let project_root = ExportConfig::determine_project_root(args.project_config.root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    let (config, limits) =
        load_config_for_command(&project_root, &args.project_config, Some(&args.selection))
            .context("Failed to load configuration for preview command")?;

    let meta = core::preview(&config, None, &limits)?;
    if args.format_output.json {
        return output::print_json(&meta);
    }
    output::print_preview(&meta);
    output::print_warnings(&meta.warnings, quiet);
    Ok(())
}
