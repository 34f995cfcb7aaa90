use crate::cli_args::ExportArgs;
use crate::load_config_for_command;
use crate::output;
use anyhow::{Context, Result};
use colored::*;
use log;
use xbundle_core::{self as core, AppError, CancellationToken, ExportConfig, ExportOptions, OutputFormat};

pub fn handle_export_command(args: ExportArgs, quiet: bool) -> Result<()> {
    let project_root = ExportConfig::determine_project_root(args.project_config.root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    let (mut config, limits) =
        load_config_for_command(&project_root, &args.project_config, Some(&args.selection))
            .context("Failed to load configuration for export command")?;
    if let Some(format) = args.format.as_deref() {
        config.output_format = match format {
            "md" => OutputFormat::Md,
            _ => OutputFormat::Txt,
        };
    }

    let cancel = CancellationToken::new();
    register_interrupt(&cancel)?;
    let options = ExportOptions {
        overwrite: args.overwrite,
        cancel: Some(cancel),
    };

    let result = match core::export(&config, None, &args.output, &options, &limits) {
        Ok(result) => result,
        Err(e) => {
            if e.left_partial_output() && !quiet {
                eprintln!(
                    "{} '{}' is incomplete and was left in place.",
                    "Note:".yellow().bold(),
                    args.output
                );
            }
            return Err(e.into());
        }
    };

    if args.format_output.json {
        return output::print_json(&result);
    }
    if !quiet {
        output::print_export_result(&result);
    }
    output::print_warnings(&result.notes, quiet);
    Ok(())
}

/// First Ctrl-C requests a cooperative stop; a second one exits immediately.
#[cfg(unix)]
fn register_interrupt(cancel: &CancellationToken) -> Result<()> {
    use signal_hook::consts::SIGINT;
    use signal_hook::flag;

    let flag = cancel.flag();
    flag::register_conditional_shutdown(SIGINT, 130, flag.clone())
        .map_err(|e| AppError::Config(format!("Failed to register interrupt handler: {}", e)))?;
    flag::register(SIGINT, flag)
        .map_err(|e| AppError::Config(format!("Failed to register interrupt handler: {}", e)))?;
    log::debug!("Interrupt handler registered for export");
    Ok(())
}

#[cfg(not(unix))]
fn register_interrupt(_cancel: &CancellationToken) -> Result<()> {
    Ok(())
}
