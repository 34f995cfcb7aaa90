pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod paths;
pub mod preview;
pub mod resolver;
pub mod rules;
pub mod scanner;
pub mod tree;
pub mod writer;

pub use cancel::CancellationToken;
pub use config::{ExportConfig, LargeFileStrategy, ManualSelection, OutputFormat, ProjectFile, ScanLimits};
pub use engine::{evaluate, export, preview, resolve_selection, scan_children, scan_root};
pub use error::{AppError, ErrorCode, Result};
pub use preview::PreviewMeta;
pub use resolver::{
    DirResolution, FileResolution, InheritedState, Reason, ResolvedSelection, SelectionSummary,
    resolve, resolve_full,
};
pub use rules::{RuleMatcher, RuleVerdict};
pub use scanner::{RootScan, ScanBatch};
pub use tree::{KnownNode, KnownTree, TreeNode};
pub use writer::{CountingWriter, ExportOptions, ExportResult};
