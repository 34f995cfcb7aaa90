use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Stable error codes surfaced at the operation boundary as `[E_CODE] message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_ROOT_REQUIRED")]
    RootRequired,
    #[serde(rename = "E_ROOT_INVALID")]
    RootInvalid,
    #[serde(rename = "E_ROOT_NOT_DIR")]
    RootNotDir,
    #[serde(rename = "E_PATH_OUTSIDE_ROOT")]
    PathOutsideRoot,
    #[serde(rename = "E_DIRPATH_NOT_DIR")]
    DirPathNotDir,
    #[serde(rename = "E_OUTPUT_REQUIRED")]
    OutputRequired,
    #[serde(rename = "E_OUTPUT_IS_DIR")]
    OutputIsDir,
    #[serde(rename = "E_OUTPUT_EXISTS")]
    OutputExists,
    #[serde(rename = "E_IO_READ")]
    IoRead,
    #[serde(rename = "E_IO_WRITE")]
    IoWrite,
    #[serde(rename = "E_RULE_INVALID_GLOB")]
    RuleInvalidGlob,
    #[serde(rename = "E_EXPORT_CANCELLED")]
    ExportCancelled,
    #[serde(rename = "E_CONFIG")]
    Config,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RootRequired => "E_ROOT_REQUIRED",
            ErrorCode::RootInvalid => "E_ROOT_INVALID",
            ErrorCode::RootNotDir => "E_ROOT_NOT_DIR",
            ErrorCode::PathOutsideRoot => "E_PATH_OUTSIDE_ROOT",
            ErrorCode::DirPathNotDir => "E_DIRPATH_NOT_DIR",
            ErrorCode::OutputRequired => "E_OUTPUT_REQUIRED",
            ErrorCode::OutputIsDir => "E_OUTPUT_IS_DIR",
            ErrorCode::OutputExists => "E_OUTPUT_EXISTS",
            ErrorCode::IoRead => "E_IO_READ",
            ErrorCode::IoWrite => "E_IO_WRITE",
            ErrorCode::RuleInvalidGlob => "E_RULE_INVALID_GLOB",
            ErrorCode::ExportCancelled => "E_EXPORT_CANCELLED",
            ErrorCode::Config => "E_CONFIG",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    #[error("[E_ROOT_REQUIRED] rootPath is required")]
    RootRequired,

    #[error("[E_ROOT_INVALID] Invalid rootPath '{}': {source}", .path.display())]
    RootInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[E_ROOT_NOT_DIR] rootPath must be a directory: {}", .path.display())]
    RootNotDir { path: PathBuf },

    #[error("[E_PATH_OUTSIDE_ROOT] Path '{path}' is outside of rootPath")]
    PathOutsideRoot { path: String },

    #[error("[E_DIRPATH_NOT_DIR] dirPath must be a directory: {path}")]
    DirPathNotDir { path: String },

    #[error("[E_OUTPUT_REQUIRED] outputPath is required")]
    OutputRequired,

    #[error("[E_OUTPUT_IS_DIR] outputPath must be a file path, not a directory: {}", .path.display())]
    OutputIsDir { path: PathBuf },

    #[error("[E_OUTPUT_EXISTS] outputPath already exists and overwrite is disabled: {}", .path.display())]
    OutputExists { path: PathBuf },

    #[error("[E_IO_READ] {context} '{}': {source}", .path.display())]
    Read {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[E_IO_WRITE] Failed to write '{}': {source}{}", .path.display(), partial_note(.partial))]
    Write {
        path: PathBuf,
        partial: bool,
        #[source]
        source: std::io::Error,
    },

    #[error("[E_RULE_INVALID_GLOB] Invalid glob pattern \"{pattern}\": {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error(
        "[E_EXPORT_CANCELLED] Export to '{}' cancelled after {exported_files} file(s){}",
        .path.display(),
        cancel_note(.output_left)
    )]
    ExportCancelled {
        path: PathBuf,
        exported_files: usize,
        output_left: bool,
    },

    #[error("[E_CONFIG] {0}")]
    Config(String),
}

fn partial_note(partial: &bool) -> &'static str {
    if *partial {
        " (partial output left on disk for diagnosis)"
    } else {
        ""
    }
}

fn cancel_note(output_left: &bool) -> &'static str {
    if *output_left {
        "; incomplete output left on disk"
    } else {
        "; nothing was written"
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::RootRequired => ErrorCode::RootRequired,
            AppError::RootInvalid { .. } => ErrorCode::RootInvalid,
            AppError::RootNotDir { .. } => ErrorCode::RootNotDir,
            AppError::PathOutsideRoot { .. } => ErrorCode::PathOutsideRoot,
            AppError::DirPathNotDir { .. } => ErrorCode::DirPathNotDir,
            AppError::OutputRequired => ErrorCode::OutputRequired,
            AppError::OutputIsDir { .. } => ErrorCode::OutputIsDir,
            AppError::OutputExists { .. } => ErrorCode::OutputExists,
            AppError::Read { .. } => ErrorCode::IoRead,
            AppError::Write { .. } => ErrorCode::IoWrite,
            AppError::InvalidGlob { .. } => ErrorCode::RuleInvalidGlob,
            AppError::ExportCancelled { .. } => ErrorCode::ExportCancelled,
            AppError::Config(_) => ErrorCode::Config,
        }
    }

    pub fn read(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Read {
            context,
            path: path.into(),
            source,
        }
    }

    /// True when a fatal failure left a partially written output file behind.
    pub fn left_partial_output(&self) -> bool {
        matches!(
            self,
            AppError::Write { partial: true, .. }
                | AppError::ExportCancelled {
                    output_left: true,
                    ..
                }
        )
    }
}

impl From<globset::Error> for AppError {
    fn from(err: globset::Error) -> Self {
        AppError::InvalidGlob {
            pattern: err.glob().unwrap_or_default().to_string(),
            message: err.kind().to_string(),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(format!("TOML parsing error: {}", err))
    }
}
