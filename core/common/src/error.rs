//! Common error types for StoreBridge.

use std::fmt;

use thiserror::Error;

use crate::types::StoragePath;

/// Top-level error type for StoreBridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested configuration or mode is not supported by a backend.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No storage is registered under the requested name.
    #[error("No file storage is registered for storage name {0}")]
    NotRegistered(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the current state of the resource.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific storage fault.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation observed a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,

    /// Backend was used after it had been released.
    #[error("Storage released: {0}")]
    Released(String),

    /// Streaming bytes between two backends failed.
    #[error("Transfer from {source_path} to {target_path} failed: {source}{}", SuppressedDisplay(.suppressed))]
    Transfer {
        source_path: String,
        target_path: String,
        #[source]
        source: Box<Error>,
        /// Cleanup failures that happened while unwinding from `source`.
        suppressed: Vec<Error>,
    },

    /// Some files of a folder copy failed; the rest were written.
    #[error("{0}")]
    PartialCopy(Box<FolderCopyFailure>),

    /// One or more backends failed to release.
    #[error("Failed to release {}", ReleaseDisplay(.0))]
    Release(Vec<(String, Error)>),
}

impl Error {
    /// Whether this error (or the error it wraps) means the path was missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Transfer { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Transfer { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// A single file copied by a folder copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub source: StoragePath,
    pub target: StoragePath,
    pub bytes: u64,
}

/// A single file a folder copy failed to copy.
#[derive(Debug)]
pub struct FailedCopy {
    pub source: StoragePath,
    pub target: StoragePath,
    pub error: Error,
}

/// Outcome of a folder copy in which at least one file failed.
///
/// No rollback is performed: every entry in `copied` is present on the
/// target storage.
#[derive(Debug, Default)]
pub struct FolderCopyFailure {
    pub copied: Vec<CopiedFile>,
    pub failed: Vec<FailedCopy>,
}

impl FolderCopyFailure {
    /// Source paths of the files that failed.
    pub fn failed_paths(&self) -> Vec<&StoragePath> {
        self.failed.iter().map(|f| &f.source).collect()
    }
}

impl fmt::Display for FolderCopyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Folder copy failed for {} of {} files",
            self.failed.len(),
            self.failed.len() + self.copied.len()
        )?;
        for failed in &self.failed {
            write!(f, "; {} -> {}: {}", failed.source, failed.target, failed.error)?;
        }
        Ok(())
    }
}

struct SuppressedDisplay<'a>(&'a [Error]);

impl fmt::Display for SuppressedDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for err in self.0 {
            write!(f, " (suppressed: {})", err)?;
        }
        Ok(())
    }
}

struct ReleaseDisplay<'a>(&'a [(String, Error)]);

impl fmt::Display for ReleaseDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, err)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, err)?;
        }
        Ok(())
    }
}
