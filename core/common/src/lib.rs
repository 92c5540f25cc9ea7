//! Common utilities and types shared across StoreBridge modules.
//!
//! This crate provides the error taxonomy and the backend-independent
//! path and naming types used by the storage layer and its callers.

pub mod error;
pub mod types;

pub use error::{CopiedFile, Error, FailedCopy, FolderCopyFailure, Result};
pub use types::{SecretString, StorageName, StoragePath};
