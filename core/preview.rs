use crate::config::{ExportConfig, LargeFileStrategy};
use crate::resolver::ResolvedSelection;
use serde::Serialize;

/// Bytes per token for the size-based estimate.
const BYTES_PER_TOKEN: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewMeta {
    pub included_files: usize,
    pub estimated_bytes: u64,
    pub estimated_tokens: Option<u64>,
    pub warnings: Vec<String>,
}

/// Sizes of included files with the truncation cap applied. Nothing is read.
pub fn estimate(config: &ExportConfig, resolved: &ResolvedSelection) -> PreviewMeta {
    let cap = config.max_file_bytes();
    let mut warnings = resolved.warnings.clone();
    let mut included_files = 0;
    let mut estimated_bytes: u64 = 0;

    for (rel, resolution) in resolved.included_files() {
        included_files += 1;
        match resolution.size {
            Some(size) => {
                estimated_bytes = estimated_bytes.saturating_add(size.min(cap));
                if resolution.oversize && config.large_file_strategy == LargeFileStrategy::Truncate {
                    warnings.push(format!(
                        "'{}' exceeds maxFileSizeKB ({}); only the first {} bytes will be exported",
                        rel, config.max_file_size_kb, cap
                    ));
                }
            }
            None => warnings.push(format!(
                "Size of '{}' is unknown; it is not part of the estimate",
                rel
            )),
        }
    }

    log::debug!(
        "Preview: {} files, ~{} bytes",
        included_files,
        estimated_bytes
    );
    PreviewMeta {
        included_files,
        estimated_bytes,
        estimated_tokens: Some(estimate_tokens(estimated_bytes)),
        warnings,
    }
}

pub fn estimate_tokens(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_TOKEN)
}
