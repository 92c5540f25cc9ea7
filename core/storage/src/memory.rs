//! In-memory storage provider for testing and scratch data.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use storebridge_common::{Error, Result, StoragePath};

use crate::provider::{ByteStream, Entry, FileStorage, StorageBackend, WriteMode, WriteStream};

/// Size of the chunks handed out by read streams.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory file.
#[derive(Debug, Clone)]
struct MemoryFile {
    data: Bytes,
    modified: DateTime<Utc>,
}

type FileMap = BTreeMap<StoragePath, MemoryFile>;

/// In-memory storage provider.
///
/// Files are keyed by path; folders exist implicitly as long as a file
/// lives below them. All data is lost on drop.
pub struct MemoryProvider {
    files: Arc<RwLock<FileMap>>,
    open_streams: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(BTreeMap::new())),
            open_streams: Arc::new(AtomicUsize::new(0)),
            released: AtomicBool::new(false),
        }
    }

    /// Number of read and write streams that have not been released yet.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::Released("memory storage".to_string()));
        }
        Ok(())
    }

    fn is_folder(files: &FileMap, path: &StoragePath) -> bool {
        path.is_root() || files.keys().any(|p| p != path && p.starts_with(path))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the open stream counter when dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryWriteStream {
    files: Arc<RwLock<FileMap>>,
    path: StoragePath,
    buffer: Vec<u8>,
    _guard: StreamGuard,
}

#[async_trait]
impl WriteStream for MemoryWriteStream {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut files = this.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(
            this.path,
            MemoryFile {
                data: Bytes::from(this.buffer),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FileStorage for MemoryProvider {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        self.ensure_active()?;
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files.contains_key(path) || Self::is_folder(&files, path))
    }

    async fn list(&self, path: Option<&StoragePath>, recursive: bool) -> Result<Vec<Entry>> {
        self.ensure_active()?;
        let root = StoragePath::root();
        let path = path.unwrap_or(&root);
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);

        if files.contains_key(path) {
            return Err(Error::InvalidOperation(format!("Not a folder: {}", path)));
        }
        if !Self::is_folder(&files, path) {
            return Err(Error::NotFound(format!("Folder not found: {}", path)));
        }

        let mut folders = BTreeSet::new();
        let mut results = Vec::new();
        for (file_path, file) in files.range(path.clone()..) {
            let Some(relative) = file_path.strip_prefix(path) else {
                break;
            };
            let depth = relative.components().len();
            if depth == 1 || recursive {
                results.push(Entry::file(
                    file_path.clone(),
                    file.data.len() as u64,
                    Some(file.modified),
                ));
            }
            // Record every folder between `path` and the file.
            let folder_depth = if recursive { depth - 1 } else { depth.min(2) - 1 };
            let mut folder = path.clone();
            for component in &relative.components()[..folder_depth] {
                folder = folder.join(component)?;
                folders.insert(folder.clone());
            }
        }

        results.extend(folders.into_iter().map(Entry::directory));
        Ok(results)
    }

    async fn open_read(&self, path: &StoragePath) -> Result<ByteStream> {
        self.ensure_active()?;
        let data = {
            let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
            match files.get(path) {
                Some(file) => file.data.clone(),
                None if Self::is_folder(&files, path) => {
                    return Err(Error::InvalidOperation(format!(
                        "Cannot read folder: {}",
                        path
                    )));
                }
                None => return Err(Error::NotFound(format!("File not found: {}", path))),
            }
        };

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + READ_CHUNK_SIZE).min(data.len()))))
            .collect();

        let guard = StreamGuard::new(&self.open_streams);
        let stream = stream::iter(chunks).map(move |chunk| {
            let _guard = &guard;
            chunk
        });
        Ok(Box::pin(stream))
    }

    async fn open_write(&self, path: &StoragePath, mode: WriteMode) -> Result<Box<dyn WriteStream>> {
        self.ensure_active()?;
        if path.is_root() {
            return Err(Error::InvalidOperation("Cannot write to the root".to_string()));
        }
        let buffer = {
            let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
            if Self::is_folder(&files, path) {
                return Err(Error::InvalidOperation(format!("Path is a folder: {}", path)));
            }
            match (mode, files.get(path)) {
                (WriteMode::Append, Some(existing)) => existing.data.to_vec(),
                _ => Vec::new(),
            }
        };

        Ok(Box::new(MemoryWriteStream {
            files: self.files.clone(),
            path: path.clone(),
            buffer,
            _guard: StreamGuard::new(&self.open_streams),
        }))
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.ensure_active()?;
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(file) = files.remove(from) {
            files.insert(to.clone(), file);
            return Ok(());
        }

        let moved: Vec<StoragePath> = files
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        if moved.is_empty() || from.is_root() {
            return Err(Error::NotFound(format!("Source not found: {}", from)));
        }
        for old in moved {
            if let (Some(file), Some(relative)) = (files.remove(&old), old.strip_prefix(from)) {
                files.insert(to.join_path(&relative), file);
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        self.ensure_active()?;
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);

        if files.remove(path).is_some() {
            return Ok(());
        }
        if !Self::is_folder(&files, path) {
            return Ok(());
        }
        if !recursive {
            return Err(Error::InvalidOperation(format!("Folder not empty: {}", path)));
        }
        files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryProvider {
    async fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.files
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FileStorageExt;

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    async fn seed(provider: &MemoryProvider, paths: &[&str]) {
        for p in paths {
            provider.write_text(&path(p), p).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_write_read() {
        let provider = MemoryProvider::new();
        let data = b"Hello, World!".to_vec();

        provider
            .write_bytes(&path("/test.txt"), &data, WriteMode::Create)
            .await
            .unwrap();
        assert_eq!(provider.read_bytes(&path("/test.txt")).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_large_file_is_chunked() {
        let provider = MemoryProvider::new();
        let data = vec![7u8; READ_CHUNK_SIZE * 2 + 10];
        provider
            .write_bytes(&path("/big.bin"), &data, WriteMode::Create)
            .await
            .unwrap();

        let chunks: Vec<Result<Bytes>> = provider
            .open_read(&path("/big.bin"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(provider.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_exists_files_and_folders() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/dir/sub/file.txt"]).await;

        assert!(provider.exists(&path("/dir/sub/file.txt")).await.unwrap());
        assert!(provider.exists(&path("/dir/sub")).await.unwrap());
        assert!(provider.exists(&path("/dir")).await.unwrap());
        assert!(!provider.exists(&path("/di")).await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let provider = MemoryProvider::new();
        let mut writer = provider
            .open_write(&path("/draft.txt"), WriteMode::Create)
            .await
            .unwrap();
        writer.write(b"partial").await.unwrap();
        assert_eq!(provider.open_streams(), 1);
        drop(writer);

        assert!(!provider.exists(&path("/draft.txt")).await.unwrap());
        assert_eq!(provider.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_list_non_recursive() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/dir/a.txt", "/dir/b.txt", "/dir/sub/c.txt", "/other.txt"]).await;

        let mut contents: Vec<String> = provider
            .list(Some(&path("/dir")), false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path.to_string_path())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["/dir/a.txt", "/dir/b.txt", "/dir/sub"]);
    }

    #[tokio::test]
    async fn test_list_recursive_from_root() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/dir/a.txt", "/dir/sub/deep/c.txt"]).await;

        let entries = provider.list(None, true).await.unwrap();
        let files: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.path.to_string_path())
            .collect();
        let folders: Vec<String> = entries
            .iter()
            .filter(|e| e.is_directory)
            .map(|e| e.path.to_string_path())
            .collect();

        assert_eq!(files, vec!["/dir/a.txt", "/dir/sub/deep/c.txt"]);
        assert_eq!(folders, vec!["/dir", "/dir/sub", "/dir/sub/deep"]);
    }

    #[tokio::test]
    async fn test_list_missing_folder_fails() {
        let provider = MemoryProvider::new();
        let err = provider.list(Some(&path("/nope")), false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_file_and_folder() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/old.txt", "/dir/a.txt", "/dir/sub/b.txt"]).await;

        provider.rename(&path("/old.txt"), &path("/new.txt")).await.unwrap();
        assert!(!provider.exists(&path("/old.txt")).await.unwrap());
        assert!(provider.exists(&path("/new.txt")).await.unwrap());

        provider.rename(&path("/dir"), &path("/moved")).await.unwrap();
        assert_eq!(
            provider.read_text(&path("/moved/sub/b.txt")).await.unwrap(),
            "/dir/sub/b.txt"
        );
        assert!(!provider.exists(&path("/dir")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_missing_fails() {
        let provider = MemoryProvider::new();
        let err = provider
            .rename(&path("/ghost"), &path("/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_non_empty_folder_requires_recursive() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/dir/a.txt", "/dir/b.txt"]).await;

        let err = provider.remove(&path("/dir"), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(provider.list(Some(&path("/dir")), true).await.unwrap().len(), 2);

        provider.remove(&path("/dir"), true).await.unwrap();
        assert!(!provider.exists(&path("/dir")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let provider = MemoryProvider::new();
        provider.remove(&path("/missing.txt"), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let provider = MemoryProvider::new();
        seed(&provider, &["/a.txt"]).await;

        provider.release().await.unwrap();
        provider.release().await.unwrap();
        assert!(provider.is_released());

        let err = provider.exists(&path("/a.txt")).await.unwrap_err();
        assert!(matches!(err, Error::Released(_)));
    }
}
