use std::path::PathBuf;

use thiserror::Error;

/// Failure to enumerate a configured folder.
///
/// Recovered locally: the folder contributes zero images and the other
/// folders keep playing.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The folder is missing, not a directory, or not readable.
    #[error("folder unavailable: {}", folder.display())]
    FolderUnavailable {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn folder(&self) -> &PathBuf {
        match self {
            Self::FolderUnavailable { folder, .. } => folder,
        }
    }
}

/// A single image could not be read or decoded.
///
/// Cloned once per waiter attached to the in-flight decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to decode {}: {reason}", path.display())]
pub struct DecodeFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl DecodeFailure {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
