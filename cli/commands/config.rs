use crate::cli_args::ConfigArgs;
use crate::output::write_to_stdout;
use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use xbundle_core::{AppError, ProjectFile};

pub fn handle_config_command(args: &ConfigArgs, project_root: &Path, quiet: bool) -> Result<()> {
    let default_toml = ProjectFile::default_toml()?;

    if !args.save {
        return write_to_stdout(&default_toml);
    }

    let save_path = ProjectFile::default_path(project_root);
    if save_path.exists() && !args.force {
        anyhow::bail!(AppError::Config(format!(
            "Config file already exists at {}; pass --force to replace it",
            save_path.display()
        )));
    }
    if let Some(parent) = save_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(&save_path, &default_toml)
        .with_context(|| format!("Failed to write config file {}", save_path.display()))?;
    log::info!("Default config written to {}", save_path.display());

    if !quiet {
        println!(
            "{} Default config saved to: {}",
            "✅".green(),
            save_path.display().to_string().blue()
        );
    }
    Ok(())
}
