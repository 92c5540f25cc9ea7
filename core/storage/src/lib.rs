//! Storage backends, registry and cross-backend copy for StoreBridge.
//!
//! Backends implement [`FileStorage`] (data operations) and
//! [`StorageBackend`] (lifecycle). A [`StorageManager`] builds one backend per
//! configured [`StorageOptions`] entry, owns it until release, and hands out
//! [`StorageHandle`]s that can use a backend but never release it.
//! [`copy_file`] and [`copy_folder`] move data between any two storages.
//!
//! # Design Principles
//! - Backend isolation: copy and registry code only see the trait
//! - Async operations: all I/O is async and safe to run concurrently
//! - Streaming: files move chunk by chunk, never loaded whole
//! - Owner-only release: handles borrow the manager

pub mod blob;
pub mod config;
pub mod copy;
pub mod facade;
pub mod factory;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use blob::BlobProvider;
pub use config::{AzureStorageOptions, LocalStorageOptions, MemoryStorageOptions, StorageOptions};
pub use copy::{copy_file, copy_folder, CopyOptions, FolderCopyReport, TargetLayout};
pub use facade::StorageHandle;
pub use factory::{make_cloud_blob_backend, make_local_disk_backend, BackendFactory, DefaultBackendFactory};
pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{
    ByteStream, Entry, FileStorage, FileStorageExt, StorageBackend, WriteMode, WriteStream,
};
pub use registry::StorageManager;
