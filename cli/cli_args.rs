use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ProjectConfigOpts {
    #[arg(
        long,
        help = "Root directory to export (default: $PROJECT_ROOT or current dir).",
        help_heading = "Project Setup",
        value_name = "PATH"
    )]
    pub root: Option<PathBuf>,

    #[arg(
        long,
        help = "Specify path/filename of the TOML config file (default: .xtools/xbundle/xbundle.toml).",
        value_name = "CONFIG_FILE",
        conflicts_with = "no_config_file",
        help_heading = "Project Setup"
    )]
    pub config_file: Option<String>,

    #[arg(
        long,
        help = "Disable loading any TOML config file.",
        conflicts_with = "config_file",
        help_heading = "Project Setup"
    )]
    pub no_config_file: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectionOpts {
    #[arg(long = "include-glob", value_name = "PATTERN", action = clap::ArgAction::Append, help = "Add an include (allow-list) glob.", help_heading = "Selection Rules")]
    pub include_glob: Vec<String>,
    #[arg(long = "exclude-glob", value_name = "PATTERN", action = clap::ArgAction::Append, help = "Add an exclude glob. A trailing '/' matches a whole directory.", help_heading = "Selection Rules")]
    pub exclude_glob: Vec<String>,
    #[arg(long = "include-ext", value_name = "EXT", action = clap::ArgAction::Append, help = "Add an include (allow-list) extension, e.g. '.rs'.", help_heading = "Selection Rules")]
    pub include_ext: Vec<String>,
    #[arg(long = "exclude-ext", value_name = "EXT", action = clap::ArgAction::Append, help = "Add an exclude extension, e.g. 'lock'.", help_heading = "Selection Rules")]
    pub exclude_ext: Vec<String>,

    #[arg(
        long,
        value_name = "SIZE_STRING",
        help = "Large-file threshold (e.g. '512KiB', '1MB'); bare numbers are bytes.",
        help_heading = "Selection Rules"
    )]
    pub max_file_size: Option<String>,

    #[arg(
        long,
        value_name = "STRATEGY",
        value_parser = ["truncate", "skip"],
        help = "What to do with files above the threshold [default: truncate].",
        help_heading = "Selection Rules"
    )]
    pub large_file_strategy: Option<String>,

    #[arg(
        long,
        help = "Respect .gitignore files [default: enabled].",
        overrides_with = "disable_gitignore",
        help_heading = "Ignore Rules"
    )]
    pub enable_gitignore: bool,
    #[arg(
        long,
        help = "Ignore .gitignore files.",
        overrides_with = "enable_gitignore",
        help_heading = "Ignore Rules"
    )]
    pub disable_gitignore: bool,

    #[arg(long = "select", value_name = "PATH", action = clap::ArgAction::Append, help = "Manually include a path (inherited by descendants).", help_heading = "Manual Selection")]
    pub select: Vec<String>,
    #[arg(long = "deselect", value_name = "PATH", action = clap::ArgAction::Append, help = "Manually exclude a path (inherited by descendants).", help_heading = "Manual Selection")]
    pub deselect: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FormatOutputOpts {
    #[arg(
        long,
        help = "Print machine-readable JSON instead of tables.",
        help_heading = "Output Formatting"
    )]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Select project files and bundle them into one text artifact.",
    long_about = "xbundle resolves which files of a project are in scope (gitignore, glob and \nextension rules, manual selections) and writes their content into a single \ntxt or markdown file, e.g. for feeding into a language model.",
    help_template = "{about-section}\nUsage: {usage}\n\n{all-args}{after-help}",
    after_help = "EXAMPLES:\n  xbundle scan --depth 1\n  xbundle evaluate --list --exclude-glob 'target/'\n  xbundle preview --max-file-size 64KiB\n  xbundle export -o bundle.md --format md --deselect tests",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase message verbosity (-v, -vv).")]
    pub verbose: u8,

    #[arg(
        short,
        long,
        global = true,
        help = "Silence informational messages and warnings."
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    #[command(
        visible_alias = "s",
        about = "List the root or one directory, annotated with ignore status."
    )]
    Scan(ScanArgs),

    #[command(
        visible_alias = "e",
        about = "Count included and excluded files."
    )]
    Evaluate(EvaluateArgs),

    #[command(
        visible_alias = "p",
        about = "Estimate export size without writing anything."
    )]
    Preview(PreviewArgs),

    #[command(
        visible_alias = "x",
        about = "Write all included files into one artifact."
    )]
    Export(ExportArgs),

    #[command(about = "Show or save the default configuration file structure.")]
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory to list, relative to the root (default: the root)."
    )]
    pub dir: Option<String>,

    #[arg(
        long,
        value_name = "N",
        default_value_t = 0,
        help = "Also expand subdirectories N levels deep."
    )]
    pub depth: usize,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub selection: SelectionOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,

    #[arg(long, help = "List every file with its resolution reason.")]
    pub list: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub selection: SelectionOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub selection: SelectionOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Destination file; parent directories are created.",
        help_heading = "Output Control"
    )]
    pub output: String,

    #[arg(
        long,
        help = "Replace the destination if it already exists.",
        help_heading = "Output Control"
    )]
    pub overwrite: bool,

    #[arg(
        short = 'f',
        long,
        value_name = "FORMAT",
        value_parser = ["txt", "md"],
        help = "Artifact format [default: txt].",
        help_heading = "Output Control"
    )]
    pub format: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,

    #[arg(long, help = "Save default config structure to the default path.")]
    pub save: bool,

    #[arg(long, requires = "save", help = "Overwrite an existing config file.")]
    pub force: bool,
}
