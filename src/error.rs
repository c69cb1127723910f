//! Typed failure classes the pipeline branches on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    /// The record-history file exists but cannot be parsed. Fatal for the run.
    #[error("record store '{path}' is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The language-model call failed; the thread is treated as a non-applicant.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A document could not be turned into text.
    #[error("could not read document '{name}': {reason}")]
    Document { name: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;

impl IntakeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the run must stop rather than warn and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreCorrupt { .. } | Self::Config(_))
    }
}
