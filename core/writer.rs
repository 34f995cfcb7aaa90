//! Streams every included file into one text artifact.

use crate::cancel::CancellationToken;
use crate::config::{ExportConfig, LargeFileStrategy, OutputFormat};
use crate::error::{AppError, Result};
use crate::paths::{abs_path, canonicalize_root, relative_unix_path};
use crate::resolver::{Reason, ResolvedSelection};
use log;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Bytes inspected for NUL when classifying content as binary.
const BINARY_PROBE_LEN: usize = 8000;
const BINARY_PLACEHOLDER: &str = "[binary file omitted]";
const UNDECODABLE_PLACEHOLDER: &str = "[undecodable content omitted]";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub overwrite: bool,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub output_path: String,
    pub exported_files: usize,
    pub skipped_files: usize,
    pub total_bytes_written: u64,
    pub notes: Vec<String>,
}

/// Checks the destination before any work is done. `~` is expanded.
pub fn validate_output_path(output_path: &str, overwrite: bool) -> Result<PathBuf> {
    let trimmed = output_path.trim();
    if trimmed.is_empty() {
        return Err(AppError::OutputRequired);
    }
    let path = PathBuf::from(shellexpand::tilde(trimmed).as_ref());
    if path.is_dir() || trimmed.ends_with('/') || trimmed.ends_with('\\') {
        return Err(AppError::OutputIsDir { path });
    }
    if path.exists() && !overwrite {
        return Err(AppError::OutputExists { path });
    }
    Ok(path)
}

/// Writes the artifact for an already resolved selection. Notes start with
/// the selection warnings. Files that cannot be opened are dropped before
/// the structure section is written, so it lists exactly the files that get
/// a section. Later read problems become notes; a failure to write the
/// destination is fatal and leaves whatever was written in place.
pub fn write(
    config: &ExportConfig,
    resolved: &ResolvedSelection,
    output_path: &str,
    options: &ExportOptions,
) -> Result<ExportResult> {
    let root = canonicalize_root(&config.root_path)?;
    let path = validate_output_path(output_path, options.overwrite)?;
    let file = open_output(&path, options.overwrite)?;
    let destination_key = fs::canonicalize(&path)
        .ok()
        .and_then(|canon| {
            canon
                .starts_with(&root)
                .then(|| relative_unix_path(&root, &canon))
                .flatten()
        });

    let mut export = Export {
        format: config.output_format,
        strategy: config.large_file_strategy,
        cap: config.max_file_bytes(),
        max_file_size_kb: config.max_file_size_kb,
        sink: Sink {
            out: CountingWriter::new(BufWriter::new(file)),
            path: path.clone(),
        },
        exported_files: 0,
        skipped_files: 0,
        notes: resolved.warnings.clone(),
    };

    log::info!("Exporting to {}", path.display());
    let mut planned: Vec<&str> = Vec::new();
    for (rel, resolution) in &resolved.files {
        if !resolution.included {
            // Named in the selection warnings already.
            if resolution.reason == Reason::Oversize {
                export.skipped_files += 1;
            }
            continue;
        }
        if Some(rel.as_str()) == destination_key.as_deref() {
            export.skip(rel, "it is the export destination".to_string());
            continue;
        }
        match check_readable(&abs_path(&root, rel), export.cap, export.strategy) {
            Ok(None) => planned.push(rel.as_str()),
            Ok(Some(size)) => export.skip(
                rel,
                format!(
                    "{} bytes exceeds maxFileSizeKB ({})",
                    size, export.max_file_size_kb
                ),
            ),
            Err(e) => {
                log::warn!("Failed to open '{}': {}", rel, e);
                export.skip(rel, format!("read failed: {}", e));
            }
        }
    }

    export.write_structure(&planned)?;
    for rel in planned {
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            log::warn!("Export cancelled after {} files", export.exported_files);
            export.sink.flush()?;
            return Err(AppError::ExportCancelled {
                path,
                exported_files: export.exported_files,
                output_left: true,
            });
        }
        export.write_file(&root, rel)?;
    }

    export.sink.flush()?;
    let result = ExportResult {
        output_path: path.display().to_string(),
        exported_files: export.exported_files,
        skipped_files: export.skipped_files,
        total_bytes_written: export.sink.out.count(),
        notes: export.notes,
    };
    log::info!(
        "Export complete: {} files written, {} skipped, {} bytes",
        result.exported_files,
        result.skipped_files,
        result.total_bytes_written
    );
    Ok(result)
}

fn open_output(path: &Path, overwrite: bool) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AppError::Write {
            path: path.to_path_buf(),
            partial: false,
            source: e,
        })?;
    }
    let mut open_options = OpenOptions::new();
    open_options.write(true);
    if overwrite {
        open_options.create(true).truncate(true);
    } else {
        // Loses a race against a concurrent export instead of merging.
        open_options.create_new(true);
    }
    open_options.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            AppError::OutputExists {
                path: path.to_path_buf(),
            }
        } else if path.is_dir() {
            AppError::OutputIsDir {
                path: path.to_path_buf(),
            }
        } else {
            AppError::Write {
                path: path.to_path_buf(),
                partial: false,
                source: e,
            }
        }
    })
}

/// Counts bytes accepted by the inner writer.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct Sink {
    out: CountingWriter<BufWriter<File>>,
    path: PathBuf,
}

impl Sink {
    fn emit(&mut self, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| self.write_error(e))
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| self.write_error(e))
    }

    fn write_error(&self, source: io::Error) -> AppError {
        log::error!("Write to {} failed: {}", self.path.display(), source);
        AppError::Write {
            path: self.path.clone(),
            partial: true,
            source,
        }
    }
}

struct Export {
    format: OutputFormat,
    strategy: LargeFileStrategy,
    cap: u64,
    max_file_size_kb: u64,
    sink: Sink,
    exported_files: usize,
    skipped_files: usize,
    notes: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum FileContent {
    Text { text: String, truncated: bool },
    Binary,
    Undecodable,
}

enum ReadOutcome {
    Content { size: u64, content: FileContent },
    TooLarge(u64),
}

impl Export {
    fn skip(&mut self, rel: &str, why: String) {
        log::debug!("Skipped '{}': {}", rel, why);
        self.skipped_files += 1;
        self.notes.push(format!("Skipped '{}': {}", rel, why));
    }

    fn write_structure(&mut self, included: &[&str]) -> Result<()> {
        let tree = render_structure(included);
        let section = match self.format {
            OutputFormat::Txt => format!("=== STRUCTURE ===\n{}=== END STRUCTURE ===\n\n", tree),
            OutputFormat::Md => {
                let fence = fence_for(&tree);
                format!("## Structure\n\n{}text\n{}{}\n\n", fence, tree, fence)
            }
        };
        self.sink.emit(&section)
    }

    fn write_file(&mut self, root: &Path, rel: &str) -> Result<()> {
        let outcome = match read_file_content(&abs_path(root, rel), self.cap, self.strategy) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Failed to read '{}': {}", rel, e);
                self.skip(rel, format!("read failed: {}", e));
                return Ok(());
            }
        };
        let (size, content) = match outcome {
            ReadOutcome::TooLarge(size) => {
                self.skip(
                    rel,
                    format!(
                        "{} bytes exceeds maxFileSizeKB ({})",
                        size, self.max_file_size_kb
                    ),
                );
                return Ok(());
            }
            ReadOutcome::Content { size, content } => (size, content),
        };

        let section = match &content {
            FileContent::Text { text, truncated } => {
                self.render_text(rel, size, text, (*truncated).then_some(self.cap))
            }
            FileContent::Binary => self.render_placeholder(rel, size, BINARY_PLACEHOLDER),
            FileContent::Undecodable => self.render_placeholder(rel, size, UNDECODABLE_PLACEHOLDER),
        };
        self.sink.emit(&section)?;

        match content {
            FileContent::Text { truncated, .. } => {
                self.exported_files += 1;
                if truncated {
                    self.notes.push(format!(
                        "Truncated '{}': wrote first {} of {} bytes",
                        rel, self.cap, size
                    ));
                }
                log::trace!("Exported '{}'", rel);
            }
            FileContent::Binary => self.skip(rel, "binary file".to_string()),
            FileContent::Undecodable => self.skip(rel, "content is not valid UTF-8".to_string()),
        }
        Ok(())
    }

    fn render_text(&self, rel: &str, size: u64, text: &str, truncated_at: Option<u64>) -> String {
        let mut body = text.to_string();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        let marker = truncated_at
            .map(|cap| format!("[TRUNCATED at {} bytes]\n", cap))
            .unwrap_or_default();
        match self.format {
            OutputFormat::Txt => format!(
                "=== FILE: {rel} ({size} bytes) ===\n{body}{marker}=== END FILE: {rel} ===\n\n"
            ),
            OutputFormat::Md => {
                let fence = fence_for(&body);
                let lang = Path::new(rel)
                    .extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("## {rel} ({size} bytes)\n\n{fence}{lang}\n{body}{fence}\n{marker}\n")
            }
        }
    }

    fn render_placeholder(&self, rel: &str, size: u64, placeholder: &str) -> String {
        match self.format {
            OutputFormat::Txt => format!(
                "=== FILE: {rel} ({size} bytes) ===\n{placeholder}\n=== END FILE: {rel} ===\n\n"
            ),
            OutputFormat::Md => format!("## {rel} ({size} bytes)\n\n{placeholder}\n\n"),
        }
    }
}

/// Opens the file without reading it. `Some(size)` when it is too large
/// for the `skip` strategy.
fn check_readable(path: &Path, cap: u64, strategy: LargeFileStrategy) -> io::Result<Option<u64>> {
    let meta = File::open(path)?.metadata()?;
    if meta.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
    }
    let size = meta.len();
    Ok((size > cap && strategy == LargeFileStrategy::Skip).then_some(size))
}

/// Reads at most `cap + 1` bytes so an oversize file is detected without
/// loading it whole.
fn read_file_content(
    path: &Path,
    cap: u64,
    strategy: LargeFileStrategy,
) -> io::Result<ReadOutcome> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    if size > cap && strategy == LargeFileStrategy::Skip {
        return Ok(ReadOutcome::TooLarge(size));
    }
    let limit = cap.saturating_add(1);
    let mut buf = Vec::with_capacity(size.min(limit) as usize);
    file.take(limit).read_to_end(&mut buf)?;

    let truncated = buf.len() as u64 > cap;
    if truncated {
        if strategy == LargeFileStrategy::Skip {
            return Ok(ReadOutcome::TooLarge(buf.len() as u64));
        }
        buf.truncate(cap as usize);
    }
    Ok(ReadOutcome::Content {
        size: size.max(buf.len() as u64),
        content: classify(&buf, truncated),
    })
}

fn classify(buf: &[u8], truncated: bool) -> FileContent {
    let probe = &buf[..buf.len().min(BINARY_PROBE_LEN)];
    if memchr::memchr(0, probe).is_some() {
        return FileContent::Binary;
    }
    let text = match std::str::from_utf8(buf) {
        Ok(text) => text,
        // A multi-byte sequence cut by truncation is dropped, not rejected.
        Err(e) if truncated && e.error_len().is_none() => {
            match std::str::from_utf8(&buf[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return FileContent::Undecodable,
            }
        }
        Err(_) => return FileContent::Undecodable,
    };
    FileContent::Text {
        text: normalize_line_endings(text),
        truncated,
    }
}

fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// A backtick fence longer than any backtick run inside `content`.
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in content.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

/// Indented listing of exported files and their parent directories, in the
/// order given (scanner order keeps each directory contiguous).
fn render_structure(paths: &[&str]) -> String {
    let mut out = String::new();
    let mut open_dirs: Vec<&str> = Vec::new();
    for path in paths {
        let segments: Vec<&str> = path.split('/').collect();
        let Some((file_name, dirs)) = segments.split_last() else {
            continue;
        };
        let common = open_dirs
            .iter()
            .zip(dirs.iter())
            .take_while(|(a, b)| a == b)
            .count();
        open_dirs.truncate(common);
        for (depth, dir) in dirs.iter().enumerate().skip(common) {
            out.push_str(&format!("{}{}/\n", "  ".repeat(depth), dir));
            open_dirs.push(*dir);
        }
        out.push_str(&format!("{}{}\n", "  ".repeat(dirs.len()), file_name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_outgrows_backtick_runs() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("a ``` b"), "````");
        assert_eq!(fence_for("`````"), "``````");
    }

    #[test]
    fn line_endings_are_normalized() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_line_endings("plain\n"), "plain\n");
    }

    #[test]
    fn classify_detects_binary_and_invalid_utf8() {
        assert_eq!(classify(b"abc\0def", false), FileContent::Binary);
        assert_eq!(classify(&[0xff, 0xfe, b'a'], false), FileContent::Undecodable);
        assert_eq!(
            classify("héllo".as_bytes(), false),
            FileContent::Text {
                text: "héllo".to_string(),
                truncated: false
            }
        );
    }

    #[test]
    fn classify_drops_multibyte_sequence_cut_by_truncation() {
        let bytes = "ab€".as_bytes();
        let cut = &bytes[..bytes.len() - 1];
        assert_eq!(
            classify(cut, true),
            FileContent::Text {
                text: "ab".to_string(),
                truncated: true
            }
        );
        assert_eq!(classify(cut, false), FileContent::Undecodable);
    }

    #[test]
    fn structure_lists_parents_once() {
        let tree = render_structure(&["src/cli/args.rs", "src/cli/run.rs", "src/lib.rs", "README.md"]);
        assert_eq!(
            tree,
            "src/\n  cli/\n    args.rs\n    run.rs\n  lib.rs\nREADME.md\n"
        );
    }

    #[test]
    fn counting_writer_tracks_accepted_bytes() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(b"hello").unwrap();
        writer.write_all(b" world").unwrap();
        assert_eq!(writer.count(), 11);
    }

    #[test]
    fn output_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_output_path("  ", false),
            Err(AppError::OutputRequired)
        ));
        let dir_path = dir.path().to_string_lossy().to_string();
        assert!(matches!(
            validate_output_path(&dir_path, true),
            Err(AppError::OutputIsDir { .. })
        ));
        let existing = dir.path().join("out.txt");
        fs::write(&existing, "x").unwrap();
        let existing = existing.to_string_lossy().to_string();
        assert!(matches!(
            validate_output_path(&existing, false),
            Err(AppError::OutputExists { .. })
        ));
        assert!(validate_output_path(&existing, true).is_ok());
    }
}
