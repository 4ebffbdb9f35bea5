use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the discovery, extraction and transfer pipeline.
///
/// Per-file failures never show up here: they are logged and counted by the
/// stage that hit them.
#[derive(Error, Debug)]
pub enum FavError {
    #[error("{what} not found: {}{detail}", path.display())]
    NotFound {
        what: &'static str,
        path: PathBuf,
        /// Extra diagnostics (e.g. a directory tree dump), may be empty.
        detail: String,
    },

    #[error("unsupported archive format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("{context}: {source}")]
    PermissionOrIo {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("operation cancelled")]
    Cancelled,
}

impl FavError {
    pub fn not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        FavError::NotFound {
            what,
            path: path.into(),
            detail: String::new(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        FavError::PermissionOrIo {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FavError>;
