use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use colored::*;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use std::io::{self, Write};
use xbundle_core::{
    ExportResult, PreviewMeta, Reason, ResolvedSelection, SelectionSummary, TreeNode,
};

pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(data).context("Failed to serialize output")?;
    write_to_stdout(&content)
}

pub fn write_to_stdout(content: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(content.as_bytes())
        .context("Failed to write to stdout")?;
    if !content.ends_with('\n') {
        handle
            .write_all(b"\n")
            .context("Failed to write newline to stdout")?;
    }
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}

pub fn readable_bytes(bytes: u64) -> String {
    Byte::from_u128(bytes as u128)
        .unwrap_or_default()
        .get_appropriate_unit(UnitType::Binary)
        .to_string()
}

/// Warnings go to stderr so `--json` output stays parseable.
pub fn print_warnings(warnings: &[String], quiet: bool) {
    if quiet || warnings.is_empty() {
        return;
    }
    eprintln!("\n{}", " Warnings ".yellow().bold().underline());
    for warning in warnings {
        eprintln!("  {} {}", "!".yellow(), warning);
    }
}

pub fn print_tree(heading: &str, nodes: &[TreeNode]) {
    println!();
    println!("{}", format!(" {} ", heading).green().bold().underline());
    if nodes.is_empty() {
        println!("  {}", "(empty)".dimmed());
        return;
    }
    print_tree_level(nodes, "");
}

fn print_tree_level(nodes: &[TreeNode], prefix: &str) {
    let last_index = nodes.len().saturating_sub(1);
    for (index, node) in nodes.iter().enumerate() {
        let is_last = index == last_index;
        let connector = if is_last { "└── " } else { "├── " };
        let name = if node.is_dir {
            format!("{}/", node.name).blue().bold()
        } else {
            node.name.normal()
        };
        let name = if node.ignored_by_gitignore {
            name.dimmed()
        } else {
            name
        };

        let mut details = Vec::new();
        if node.is_dir {
            match node.children_count {
                Some(count) if node.children.is_empty() => details.push(format!("{} entries", count)),
                None => details.push("? entries".to_string()),
                _ => {}
            }
        } else if let Some(size) = node.size {
            details.push(readable_bytes(size));
        }
        if node.ignored_by_gitignore {
            details.push("gitignored".to_string());
        }

        if details.is_empty() {
            println!("{}{}{}", prefix, connector, name);
        } else {
            println!(
                "{}{}{} {}",
                prefix,
                connector,
                name,
                format!("({})", details.join(", ")).dimmed()
            );
        }

        if !node.children.is_empty() {
            let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
            print_tree_level(&node.children, &child_prefix);
        }
    }
}

pub fn print_summary(summary: &SelectionSummary) {
    println!();
    println!("{}", " Selection Summary ".green().bold().underline());
    println!(
        "{:<20} {}",
        "Included Files:".green(),
        summary.included_files.to_string().cyan()
    );
    println!(
        "{:<20} {}",
        "Excluded Files:".green(),
        summary.excluded_files.to_string().cyan()
    );
}

pub fn print_selection_table(selection: &ResolvedSelection) {
    println!();
    println!("{}", " File Resolution ".green().bold().underline());
    if selection.files.is_empty() {
        println!("{}", "(No files found)".yellow());
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Path").fg(Color::Green),
        Cell::new("State").fg(Color::Green),
        Cell::new("Reason").fg(Color::Green),
        Cell::new("Size").fg(Color::Green),
    ]);
    for (path, resolution) in &selection.files {
        let state = if resolution.included {
            Cell::new("included").fg(Color::Green)
        } else {
            Cell::new("excluded").fg(Color::Red)
        };
        let reason = match (&resolution.reason, resolution.oversize && resolution.included) {
            (Reason::Oversize, _) => resolution.reason.to_string(),
            (reason, true) => format!("{} (truncated)", reason),
            (reason, false) => reason.to_string(),
        };
        let size = resolution
            .size
            .map(readable_bytes)
            .unwrap_or_else(|| "?".to_string());
        table.add_row(vec![Cell::new(path), state, Cell::new(reason), Cell::new(size)]);
    }
    println!("{table}");
}

pub fn print_preview(meta: &PreviewMeta) {
    println!();
    println!("{}", " Export Preview ".green().bold().underline());
    println!(
        "{:<20} {}",
        "Included Files:".green(),
        meta.included_files.to_string().cyan()
    );
    println!(
        "{:<20} {}",
        "Est. Size:".green(),
        readable_bytes(meta.estimated_bytes).cyan()
    );
    let tokens = meta
        .estimated_tokens
        .map(|t| t.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<20} {}", "Est. Tokens:".green(), tokens.cyan());
}

pub fn print_export_result(result: &ExportResult) {
    println!();
    println!("{}", " Export Complete ".green().bold().underline());
    println!(
        "{:<20} {}",
        "Output:".green(),
        result.output_path.as_str().blue()
    );
    println!(
        "{:<20} {}",
        "Exported Files:".green(),
        result.exported_files.to_string().cyan()
    );
    println!(
        "{:<20} {}",
        "Skipped Files:".green(),
        result.skipped_files.to_string().cyan()
    );
    println!(
        "{:<20} {}",
        "Bytes Written:".green(),
        readable_bytes(result.total_bytes_written).cyan()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_bytes_uses_binary_units() {
        assert!(readable_bytes(2048).contains("KiB"));
        assert!(readable_bytes(3 * 1024 * 1024).contains("MiB"));
    }
}
