//! Storage backend contract.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use storebridge_common::{Error, Result, StoragePath};

/// A file or folder returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Path of the entry, relative to the storage root.
    pub path: StoragePath,
    /// Whether this is a folder.
    pub is_directory: bool,
    /// Size in bytes (None for folders or when unknown).
    pub size: Option<u64>,
    /// Last modification time, if the backend reports one.
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn file(path: StoragePath, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            is_directory: false,
            size: Some(size),
            modified,
        }
    }

    pub fn directory(path: StoragePath) -> Self {
        Self {
            path,
            is_directory: true,
            size: None,
            modified: None,
        }
    }
}

/// How `open_write` treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create the file, overwriting any existing content.
    #[default]
    Create,
    /// Append to the file, creating it if missing.
    Append,
}

/// Byte stream type for read operations.
///
/// Dropping the stream releases the underlying handle.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Writable stream returned by [`FileStorage::open_write`].
///
/// Written data becomes visible only after [`WriteStream::commit`] for
/// [`WriteMode::Create`]. Dropping a stream without committing discards it
/// the same way [`WriteStream::abort`] does, but without reporting errors.
#[async_trait]
pub trait WriteStream: Send {
    /// Write a chunk of data.
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Complete the write and release the stream.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard pending data and release the stream.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Data operations every storage backend supports.
///
/// All operations are async and take `&self`; implementations must be safe
/// to call concurrently, since folder copies fan out many reads and writes
/// against the same backend. An operation is cancelled by dropping its
/// future, and a dropped write never publishes partial `Create` data.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Get the backend kind (e.g., "local", "azure", "memory").
    fn kind(&self) -> &str;

    /// Check if a file or folder exists.
    async fn exists(&self, path: &StoragePath) -> Result<bool>;

    /// List entries below a folder.
    ///
    /// `None` lists from the root. When `recursive` is false only immediate
    /// children are returned; otherwise every file and folder below `path`.
    ///
    /// # Errors
    /// - Folder not found (backends with real folders)
    /// - Path is a file
    async fn list(&self, path: Option<&StoragePath>, recursive: bool) -> Result<Vec<Entry>>;

    /// Open a file for reading.
    ///
    /// # Errors
    /// - File not found
    /// - Path is a folder
    async fn open_read(&self, path: &StoragePath) -> Result<ByteStream>;

    /// Open a file for writing.
    ///
    /// Missing parent folders are created implicitly.
    async fn open_write(&self, path: &StoragePath, mode: WriteMode) -> Result<Box<dyn WriteStream>>;

    /// Move/rename a file or folder.
    ///
    /// # Errors
    /// - Source not found
    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()>;

    /// Remove a file or folder.
    ///
    /// Removing a missing path is a no-op.
    ///
    /// # Errors
    /// - Folder not empty and `recursive` is false
    async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()>;
}

/// A storage backend with lifecycle control.
///
/// Only the owner of a backend (the storage manager) sees this trait;
/// callers get a [`crate::StorageHandle`] that cannot release it.
#[async_trait]
pub trait StorageBackend: FileStorage {
    /// Release connections and handles held by the backend.
    ///
    /// Idempotent. Data operations after release fail with
    /// [`Error::Released`].
    async fn release(&self) -> Result<()>;

    /// Whether `release` has been called.
    fn is_released(&self) -> bool;
}

/// Byte, text and structured helpers layered on the stream primitives.
#[async_trait]
pub trait FileStorageExt: FileStorage {
    /// Read a whole file into memory.
    async fn read_bytes(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let mut stream = self.open_read(path).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Write a whole file, replacing or appending per `mode`.
    async fn write_bytes(&self, path: &StoragePath, data: &[u8], mode: WriteMode) -> Result<()> {
        let mut writer = self.open_write(path, mode).await?;
        if let Err(e) = writer.write(data).await {
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!("Failed to abort write to {}: {}", path, abort_err);
            }
            return Err(e);
        }
        writer.commit().await
    }

    /// Read a UTF-8 text file. A leading byte order mark is dropped.
    async fn read_text(&self, path: &StoragePath) -> Result<String> {
        let data = self.read_bytes(path).await?;
        let text = String::from_utf8(data)
            .map_err(|e| Error::Serialization(format!("{} is not valid UTF-8: {}", path, e)))?;
        Ok(match text.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }

    /// Write a UTF-8 text file, replacing existing content.
    async fn write_text(&self, path: &StoragePath, contents: &str) -> Result<()> {
        self.write_bytes(path, contents.as_bytes(), WriteMode::Create)
            .await
    }

    /// Append UTF-8 text to a file.
    async fn append_text(&self, path: &StoragePath, contents: &str) -> Result<()> {
        self.write_bytes(path, contents.as_bytes(), WriteMode::Append)
            .await
    }

    /// Read a JSON document.
    async fn read_structured<T>(&self, path: &StoragePath) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let text = self.read_text(path).await?;
        serde_json::from_str(&text).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Write a value as a pretty-printed JSON document.
    async fn write_structured<T>(&self, path: &StoragePath, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let text =
            serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.write_text(path, &text).await
    }
}

impl<S: FileStorage + ?Sized> FileStorageExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use std::collections::BTreeMap;

    #[test]
    fn test_entry_serialization() {
        let entry = Entry::file(StoragePath::parse("/a/b.txt").unwrap(), 1024, Some(Utc::now()));

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: Entry = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.path, entry.path);
        assert_eq!(deserialized.size, Some(1024));
        assert!(!deserialized.is_directory);
    }

    #[test]
    fn test_write_mode_default_is_create() {
        assert_eq!(WriteMode::default(), WriteMode::Create);
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let storage = MemoryProvider::new();
        let path = StoragePath::parse("/notes/hello.txt").unwrap();

        storage.write_text(&path, "héllo wörld").await.unwrap();
        assert_eq!(storage.read_text(&path).await.unwrap(), "héllo wörld");
    }

    #[tokio::test]
    async fn test_read_text_strips_bom() {
        let storage = MemoryProvider::new();
        let path = StoragePath::parse("/bom.txt").unwrap();

        storage
            .write_bytes(&path, "\u{feff}abc".as_bytes(), WriteMode::Create)
            .await
            .unwrap();
        assert_eq!(storage.read_text(&path).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_read_text_rejects_invalid_utf8() {
        let storage = MemoryProvider::new();
        let path = StoragePath::parse("/bin.dat").unwrap();

        storage
            .write_bytes(&path, &[0xff, 0xfe, 0x00], WriteMode::Create)
            .await
            .unwrap();
        let err = storage.read_text(&path).await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_append_text() {
        let storage = MemoryProvider::new();
        let path = StoragePath::parse("/log.txt").unwrap();

        storage.append_text(&path, "one\n").await.unwrap();
        storage.append_text(&path, "two\n").await.unwrap();
        assert_eq!(storage.read_text(&path).await.unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_structured_round_trip() {
        let storage = MemoryProvider::new();
        let path = StoragePath::parse("/settings.json").unwrap();
        let mut value = BTreeMap::new();
        value.insert("retries".to_string(), 0u32);
        value.insert("workers".to_string(), 16u32);

        storage.write_structured(&path, &value).await.unwrap();
        let read: BTreeMap<String, u32> = storage.read_structured(&path).await.unwrap();
        assert_eq!(read, value);
    }
}
