//! Non-owning view over a managed backend.

use async_trait::async_trait;
use std::fmt;

use storebridge_common::{Result, StorageName, StoragePath};

use crate::provider::{ByteStream, Entry, FileStorage, StorageBackend, WriteMode, WriteStream};

/// Borrowed handle to a backend owned by a [`crate::StorageManager`].
///
/// Forwards every data operation to the backend but has no way to release
/// it. The handle borrows the manager, so it cannot outlive it and the
/// manager cannot be released while a handle is alive.
#[derive(Clone, Copy)]
pub struct StorageHandle<'a> {
    name: StorageName,
    backend: &'a dyn StorageBackend,
}

impl<'a> StorageHandle<'a> {
    pub(crate) fn new(name: StorageName, backend: &'a dyn StorageBackend) -> Self {
        Self { name, backend }
    }

    /// Logical name the backend is registered under.
    pub fn name(&self) -> StorageName {
        self.name
    }
}

impl fmt::Debug for StorageHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .finish()
    }
}

#[async_trait]
impl<'a> FileStorage for StorageHandle<'a> {
    fn kind(&self) -> &str {
        self.backend.kind()
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        self.backend.exists(path).await
    }

    async fn list(&self, path: Option<&StoragePath>, recursive: bool) -> Result<Vec<Entry>> {
        self.backend.list(path, recursive).await
    }

    async fn open_read(&self, path: &StoragePath) -> Result<ByteStream> {
        self.backend.open_read(path).await
    }

    async fn open_write(&self, path: &StoragePath, mode: WriteMode) -> Result<Box<dyn WriteStream>> {
        self.backend.open_write(path, mode).await
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.backend.rename(from, to).await
    }

    async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        self.backend.remove(path, recursive).await
    }
}
