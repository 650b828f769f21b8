use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PlateError {
    #[error("malformed record {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("data row outside of a dye section in {path} (line {line})")]
    SectionState { path: String, line: usize },

    #[error("dye {dye} not present in {path}")]
    MissingDye { path: String, dye: String },

    #[error("render dispatch failed: {0}")]
    RenderDispatch(String),

    #[error("watched directory does not exist or is not a directory: {0}")]
    DirectoryMissing(PathBuf),

    #[error("failed to watch directory: {0}")]
    WatchSetup(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl PlateError {
    /// True for errors that exclude a single file from a collection without
    /// affecting the rest of the ingestion.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            PlateError::MalformedRecord { .. } | PlateError::SectionState { .. }
        )
    }
}
