mod cli_args;
mod commands;
mod output;

use anyhow::{Context, Result};
use byte_unit::Byte;
use clap::{CommandFactory, Parser};
use colored::*;
use log;
use std::path::Path;
use std::process;
use std::str::FromStr;

use cli_args::{Cli, Commands, ProjectConfigOpts, SelectionOpts};
use xbundle_core::{
    AppError, ErrorCode, ExportConfig, LargeFileStrategy, ManualSelection, ProjectFile, ScanLimits,
};

fn main() {
    let cli_args = Cli::parse();

    setup_logging(cli_args.quiet, cli_args.verbose);

    let quiet = cli_args.quiet;

    log::debug!("CLI args parsed: {:?}", cli_args);

    let exit_code = match run_app(cli_args, quiet) {
        Ok(_) => {
            log::info!("Application finished successfully.");
            0
        }
        Err(e) => {
            let exit_code = exit_code_for(e.downcast_ref::<AppError>());

            // Usage and config problems are always reported, even when quiet.
            if !quiet || exit_code == 1 || exit_code == 5 {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            } else {
                log::error!("Application failed: {:#}", e);
            }

            exit_code
        }
    };
    log::debug!("Exiting with code {}", exit_code);
    process::exit(exit_code);
}

fn exit_code_for(err: Option<&AppError>) -> i32 {
    match err.map(AppError::code) {
        Some(ErrorCode::Config) | Some(ErrorCode::RuleInvalidGlob) => 1,
        Some(ErrorCode::IoRead) | Some(ErrorCode::IoWrite) => 2,
        Some(ErrorCode::OutputExists) => 3,
        Some(ErrorCode::RootRequired)
        | Some(ErrorCode::RootInvalid)
        | Some(ErrorCode::RootNotDir)
        | Some(ErrorCode::PathOutsideRoot)
        | Some(ErrorCode::DirPathNotDir)
        | Some(ErrorCode::OutputRequired)
        | Some(ErrorCode::OutputIsDir) => 5,
        Some(ErrorCode::ExportCancelled) => 130,
        None => 1,
    }
}

fn setup_logging(quiet: bool, verbose: u8) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();
    log::trace!("Logger initialized with level: {:?}", log_level);
}

fn run_app(cli: Cli, quiet: bool) -> Result<()> {
    match cli.command {
        None => {
            Cli::command().print_help()?;
        }
        Some(command) => match command {
            Commands::Scan(args) => {
                log::debug!("Executing 'scan' command...");
                commands::scan::handle_scan_command(args, quiet)?;
            }
            Commands::Evaluate(args) => {
                log::debug!("Executing 'evaluate' command...");
                commands::evaluate::handle_evaluate_command(args, quiet)?;
            }
            Commands::Preview(args) => {
                log::debug!("Executing 'preview' command...");
                commands::preview::handle_preview_command(args, quiet)?;
            }
            Commands::Export(args) => {
                log::debug!("Executing 'export' command...");
                commands::export::handle_export_command(args, quiet)?;
            }
            Commands::Config(args) => {
                log::debug!("Executing 'config' command...");
                let project_root =
                    ExportConfig::determine_project_root(args.project_config.root.as_ref())
                        .context("Failed to determine project root for config command")?;
                commands::config::handle_config_command(&args, &project_root, quiet)?;
            }
        },
    }
    Ok(())
}

fn merge_config_with_cli_overrides(
    mut config: ExportConfig,
    args: &SelectionOpts,
) -> Result<ExportConfig> {
    log::trace!("Applying CLI overrides to config...");

    config.include_globs.extend(args.include_glob.iter().cloned());
    config.exclude_globs.extend(args.exclude_glob.iter().cloned());
    config
        .include_extensions
        .extend(args.include_ext.iter().cloned());
    config
        .exclude_extensions
        .extend(args.exclude_ext.iter().cloned());

    if let Some(size) = &args.max_file_size {
        config.max_file_size_kb = parse_size_to_kb(size)?;
    }
    if let Some(strategy) = &args.large_file_strategy {
        config.large_file_strategy = match strategy.as_str() {
            "skip" => LargeFileStrategy::Skip,
            _ => LargeFileStrategy::Truncate,
        };
    }

    if args.disable_gitignore {
        config.use_gitignore = false;
    }
    if args.enable_gitignore {
        config.use_gitignore = true;
    }

    for path in &args.select {
        config.set_manual(path, ManualSelection::Include);
    }
    for path in &args.deselect {
        config.set_manual(path, ManualSelection::Exclude);
    }

    log::trace!("Config after CLI overrides: {:?}", config);
    Ok(config)
}

/// Whole KiB, rounded up, at least 1.
fn parse_size_to_kb(size_str: &str) -> Result<u64> {
    let byte_value = Byte::from_str(size_str).map_err(|e| {
        AppError::Config(format!(
            "Invalid size format '{}': {}. Use KiB, MB, etc.",
            size_str, e
        ))
    })?;
    let kb = byte_value.as_u128().div_ceil(1024).max(1);
    u64::try_from(kb)
        .map_err(|_| AppError::Config(format!("Size '{}' is too large", size_str)).into())
}

/// Loads the project file (if any), pins the root and applies CLI overrides.
pub fn load_config_for_command(
    project_root: &Path,
    project_opts: &ProjectConfigOpts,
    selection: Option<&SelectionOpts>,
) -> Result<(ExportConfig, ScanLimits)> {
    let config_path = ProjectFile::resolve_path(
        project_root,
        project_opts.config_file.as_ref(),
        project_opts.no_config_file,
    )
    .context("Failed to resolve configuration path")?;

    let project_file = match &config_path {
        Some(path) => ProjectFile::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProjectFile::default(),
    };

    let mut config = project_file.export;
    if !config.root_path.is_empty() {
        log::warn!("Ignoring rootPath from config file; the root comes from --root or the working directory");
    }
    config.root_path = project_root.to_string_lossy().to_string();

    if let Some(selection) = selection {
        config = merge_config_with_cli_overrides(config, selection)?;
    }

    let config = config
        .validated()
        .context("Invalid export configuration")?;
    Ok((config, project_file.limits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_strings_become_whole_kib() {
        assert_eq!(parse_size_to_kb("1KiB").unwrap(), 1);
        assert_eq!(parse_size_to_kb("1025").unwrap(), 2);
        assert_eq!(parse_size_to_kb("1").unwrap(), 1);
        assert_eq!(parse_size_to_kb("2MiB").unwrap(), 2048);
        assert!(parse_size_to_kb("lots").is_err());
    }

    #[test]
    fn cli_overrides_extend_config() {
        let selection = SelectionOpts {
            exclude_glob: vec!["target/".to_string()],
            large_file_strategy: Some("skip".to_string()),
            disable_gitignore: true,
            select: vec!["src/main.rs".to_string()],
            deselect: vec!["./src/".to_string()],
            ..SelectionOpts::default()
        };
        let config = merge_config_with_cli_overrides(ExportConfig::new("/repo"), &selection).unwrap();
        assert_eq!(config.exclude_globs, vec!["target/".to_string()]);
        assert_eq!(config.large_file_strategy, LargeFileStrategy::Skip);
        assert!(!config.use_gitignore);
        assert_eq!(
            config.manual_selections.get("src"),
            Some(&ManualSelection::Exclude)
        );
        assert_eq!(
            config.manual_selections.get("src/main.rs"),
            Some(&ManualSelection::Include)
        );
    }

    #[test]
    fn exit_codes_follow_error_codes() {
        assert_eq!(exit_code_for(Some(&AppError::OutputRequired)), 5);
        assert_eq!(
            exit_code_for(Some(&AppError::Config("bad".to_string()))),
            1
        );
        assert_eq!(exit_code_for(None), 1);
    }
}
