use std::path::PathBuf;

use thiserror::Error;

/// Host-level failures that stop a compilation outright.
///
/// Problems *inside* the source program are not errors at this level;
/// they are collected as diagnostics and reported in bulk.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source {path}: {source}")]
    SourceIo {
        path: PathBuf,
        source: std::io::Error,
    },
}
