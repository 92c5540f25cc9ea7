//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{ByteStream, Entry, FileStorage, StorageBackend, WriteMode, WriteStream};
use storebridge_common::{Error, Result, StoragePath};

/// Buffer size for streaming reads and writes.
const CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of the hidden files `Create` writes go to before commit.
const STAGING_SUFFIX: &str = ".partial";

/// Local filesystem storage provider.
///
/// Scoped to a root directory; every `StoragePath` resolves below it.
pub struct LocalProvider {
    root: PathBuf,
    released: AtomicBool,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Root exists but is not a directory
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        } else if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Local storage root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            released: AtomicBool::new(false),
        })
    }

    /// The directory this provider is scoped to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a StoragePath to a filesystem path.
    fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn ensure_active(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::Released(format!(
                "local storage at {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn create_entry(path: StoragePath, fs_meta: &std::fs::Metadata) -> Entry {
        if fs_meta.is_dir() {
            return Entry::directory(path);
        }
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(|t| t.into());
        Entry::file(path, fs_meta.len(), modified)
    }

    /// Whether `name` has the exact shape of a staging file:
    /// `.<file name>.<32 hex digits>.partial`.
    fn is_staging_name(name: &str) -> bool {
        let Some(inner) = name
            .strip_prefix('.')
            .and_then(|n| n.strip_suffix(STAGING_SUFFIX))
        else {
            return false;
        };
        match inner.rsplit_once('.') {
            Some((file_name, id)) => {
                !file_name.is_empty()
                    && id.len() == 32
                    && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            None => false,
        }
    }

    fn staging_path(target: &Path, name: &str) -> PathBuf {
        target.with_file_name(format!(
            ".{}.{}{}",
            name,
            Uuid::new_v4().simple(),
            STAGING_SUFFIX
        ))
    }

    async fn metadata_opt(fs_path: &Path) -> Result<Option<std::fs::Metadata>> {
        match fs::metadata(fs_path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parent(fs_path: &Path) -> Result<()> {
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Write stream over a local file.
///
/// `Create` writes go to a hidden staging file next to the target, renamed
/// into place on commit.
///
/// Dropping an uncommitted stream removes the staging file with a blocking
/// `std::fs::remove_file` call on the current thread. `commit` and `abort`
/// clean up asynchronously and should be preferred.
struct LocalWriteStream {
    file: Option<BufWriter<File>>,
    staging: Option<PathBuf>,
    target: PathBuf,
}

impl LocalWriteStream {
    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("Write stream already closed".to_string()))
    }
}

#[async_trait]
impl WriteStream for LocalWriteStream {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file()?.write_all(chunk).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let mut file = this
            .file
            .take()
            .ok_or_else(|| Error::InvalidOperation("Write stream already closed".to_string()))?;
        file.shutdown().await?;
        drop(file);

        if let Some(staging) = this.staging.take() {
            if let Err(e) = fs::rename(&staging, &this.target).await {
                if let Err(cleanup) = fs::remove_file(&staging).await {
                    warn!("Failed to remove staging file {}: {}", staging.display(), cleanup);
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = self;
        drop(this.file.take());
        if let Some(staging) = this.staging.take() {
            match fs::remove_file(&staging).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for LocalWriteStream {
    fn drop(&mut self) {
        drop(self.file.take());
        if let Some(staging) = self.staging.take() {
            if let Err(e) = std::fs::remove_file(&staging) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove staging file {}: {}", staging.display(), e);
                }
            }
        }
    }
}

#[async_trait]
impl FileStorage for LocalProvider {
    fn kind(&self) -> &str {
        "local"
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        self.ensure_active()?;
        Ok(fs::try_exists(self.to_fs_path(path)).await?)
    }

    async fn list(&self, path: Option<&StoragePath>, recursive: bool) -> Result<Vec<Entry>> {
        self.ensure_active()?;
        let start = path.cloned().unwrap_or_else(StoragePath::root);
        let fs_path = self.to_fs_path(&start);

        match Self::metadata_opt(&fs_path).await? {
            None => return Err(Error::NotFound(format!("Folder not found: {}", start))),
            Some(meta) if !meta.is_dir() => {
                return Err(Error::InvalidOperation(format!("Not a folder: {}", start)));
            }
            Some(_) => {}
        }

        let mut results = Vec::new();
        let mut pending = vec![start];

        while let Some(folder) = pending.pop() {
            let mut entries = fs::read_dir(self.to_fs_path(&folder)).await?;

            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    warn!("Skipping non UTF-8 name in {}: {:?}", folder, file_name);
                    continue;
                };
                if Self::is_staging_name(name) {
                    continue;
                }

                let child = folder.join(name)?;
                let fs_meta = entry.metadata().await?;
                if recursive && fs_meta.is_dir() {
                    pending.push(child.clone());
                }
                results.push(Self::create_entry(child, &fs_meta));
            }
        }

        Ok(results)
    }

    async fn open_read(&self, path: &StoragePath) -> Result<ByteStream> {
        self.ensure_active()?;
        let fs_path = self.to_fs_path(path);

        match Self::metadata_opt(&fs_path).await? {
            None => return Err(Error::NotFound(format!("File not found: {}", path))),
            Some(meta) if meta.is_dir() => {
                return Err(Error::InvalidOperation(format!(
                    "Cannot read folder: {}",
                    path
                )));
            }
            Some(_) => {}
        }

        let file = File::open(&fs_path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("File not found: {}", path)),
            _ => Error::Io(e),
        })?;
        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE).map_err(Error::Io);
        Ok(Box::pin(stream))
    }

    async fn open_write(&self, path: &StoragePath, mode: WriteMode) -> Result<Box<dyn WriteStream>> {
        self.ensure_active()?;
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidOperation("Cannot write to the root".to_string()))?;
        let target = self.to_fs_path(path);

        if let Some(meta) = Self::metadata_opt(&target).await? {
            if meta.is_dir() {
                return Err(Error::InvalidOperation(format!("Path is a folder: {}", path)));
            }
        }
        Self::ensure_parent(&target).await?;

        let (file, staging) = match mode {
            WriteMode::Create => {
                let staging = Self::staging_path(&target, name);
                (File::create(&staging).await?, Some(staging))
            }
            WriteMode::Append => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&target)
                    .await?;
                (file, None)
            }
        };

        debug!("Opened {} for {:?} write", target.display(), mode);
        Ok(Box::new(LocalWriteStream {
            file: Some(BufWriter::with_capacity(CHUNK_SIZE, file)),
            staging,
            target,
        }))
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.ensure_active()?;
        let from_path = self.to_fs_path(from);
        let to_path = self.to_fs_path(to);

        if Self::metadata_opt(&from_path).await?.is_none() {
            return Err(Error::NotFound(format!("Source not found: {}", from)));
        }
        Self::ensure_parent(&to_path).await?;

        fs::rename(&from_path, &to_path).await?;
        Ok(())
    }

    async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        self.ensure_active()?;
        let fs_path = self.to_fs_path(path);

        let Some(meta) = Self::metadata_opt(&fs_path).await? else {
            return Ok(());
        };

        if !meta.is_dir() {
            fs::remove_file(&fs_path).await?;
            return Ok(());
        }

        if path.is_root() {
            return Err(Error::InvalidOperation(
                "Cannot remove the storage root".to_string(),
            ));
        }

        if recursive {
            fs::remove_dir_all(&fs_path).await?;
            return Ok(());
        }

        // Check if empty
        let mut entries = fs::read_dir(&fs_path).await?;
        if entries.next_entry().await?.is_some() {
            return Err(Error::InvalidOperation(format!("Folder not empty: {}", path)));
        }

        fs::remove_dir(&fs_path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalProvider {
    async fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!("Released local storage at {}", self.root.display());
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
    use tempfile::TempDir;

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_local_write_read() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        let data = b"Hello, Local!".to_vec();

        provider
            .write_bytes(&path("/test.txt"), &data, WriteMode::Create)
            .await
            .unwrap();
        assert_eq!(provider.read_bytes(&path("/test.txt")).await.unwrap(), data);
        assert_eq!(std::fs::read(temp.path().join("test.txt")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_local_creates_root_and_parents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("se-local");
        let provider = LocalProvider::new(&root).unwrap();
        assert!(root.is_dir());

        provider
            .write_text(&path("/newfolder5/23skidoo.txt"), "23 skidoo!")
            .await
            .unwrap();
        assert!(root.join("newfolder5").join("23skidoo.txt").is_file());
    }

    #[tokio::test]
    async fn test_local_root_must_be_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(LocalProvider::new(&file).is_err());
    }

    #[tokio::test]
    async fn test_local_create_overwrites() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        provider.write_text(&path("/a.txt"), "first version").await.unwrap();
        provider.write_text(&path("/a.txt"), "second").await.unwrap();
        assert_eq!(provider.read_text(&path("/a.txt")).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_local_append() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        provider.append_text(&path("/log.txt"), "a").await.unwrap();
        provider.append_text(&path("/log.txt"), "b").await.unwrap();
        assert_eq!(provider.read_text(&path("/log.txt")).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_local_uncommitted_create_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let mut writer = provider
            .open_write(&path("/draft.txt"), WriteMode::Create)
            .await
            .unwrap();
        writer.write(b"partial").await.unwrap();
        drop(writer);

        assert!(!provider.exists(&path("/draft.txt")).await.unwrap());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_failed_commit_removes_staging_file() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let mut writer = provider
            .open_write(&path("/report.txt"), WriteMode::Create)
            .await
            .unwrap();
        writer.write(b"data").await.unwrap();

        // A folder appears at the target before the rename.
        std::fs::create_dir_all(temp.path().join("report.txt").join("inner")).unwrap();

        assert!(writer.commit().await.is_err());
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["report.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_local_abort_keeps_previous_content() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.write_text(&path("/a.txt"), "original").await.unwrap();

        let mut writer = provider
            .open_write(&path("/a.txt"), WriteMode::Create)
            .await
            .unwrap();
        writer.write(b"replacement").await.unwrap();
        writer.abort().await.unwrap();

        assert_eq!(provider.read_text(&path("/a.txt")).await.unwrap(), "original");
    }

    #[tokio::test]
    async fn test_local_list() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        provider.write_text(&path("/dir/file1.txt"), "1").await.unwrap();
        provider.write_text(&path("/dir/file2.txt"), "2").await.unwrap();
        provider.write_text(&path("/dir/sub/file3.txt"), "3").await.unwrap();

        let contents = provider.list(Some(&path("/dir")), false).await.unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents.iter().filter(|e| e.is_directory).count(), 1);

        let mut files: Vec<String> = provider
            .list(Some(&path("/dir")), true)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.path.to_string_path())
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec!["/dir/file1.txt", "/dir/file2.txt", "/dir/sub/file3.txt"]
        );
    }

    #[tokio::test]
    async fn test_local_list_shows_user_partial_files() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.write_text(&path("/src/.notes.partial"), "n").await.unwrap();
        provider.write_text(&path("/src/x.txt"), "x").await.unwrap();

        // A stale staging file left behind by a crashed writer stays hidden.
        let stale = LocalProvider::staging_path(&temp.path().join("src").join("x.txt"), "x.txt");
        std::fs::write(&stale, b"stale").unwrap();

        let mut listed: Vec<String> = provider
            .list(Some(&path("/src")), false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path.to_string_path())
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["/src/.notes.partial", "/src/x.txt"]);
    }

    #[test]
    fn test_staging_name_shape() {
        let id = Uuid::new_v4().simple().to_string();
        assert!(LocalProvider::is_staging_name(&format!(".a.txt.{}.partial", id)));
        assert!(!LocalProvider::is_staging_name(".notes.partial"));
        assert!(!LocalProvider::is_staging_name(".partial"));
        assert!(!LocalProvider::is_staging_name(&format!("..{}.partial", id)));
        assert!(!LocalProvider::is_staging_name(&format!(
            ".a.txt.{}.partial",
            id.to_uppercase()
        )));
        assert!(!LocalProvider::is_staging_name("report.partial"));
    }

    #[tokio::test]
    async fn test_local_list_missing_and_file() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.write_text(&path("/a.txt"), "a").await.unwrap();

        let err = provider.list(Some(&path("/missing")), true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = provider.list(Some(&path("/a.txt")), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_local_open_read_missing() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        let err = provider.open_read(&path("/nope.txt")).await.err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_rename() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.write_text(&path("/old.txt"), "x").await.unwrap();

        provider
            .rename(&path("/old.txt"), &path("/moved/new.txt"))
            .await
            .unwrap();
        assert!(!provider.exists(&path("/old.txt")).await.unwrap());
        assert_eq!(provider.read_text(&path("/moved/new.txt")).await.unwrap(), "x");

        let err = provider
            .rename(&path("/old.txt"), &path("/again.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_remove() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        provider.write_text(&path("/dir/a.txt"), "a").await.unwrap();

        let err = provider.remove(&path("/dir"), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(provider.exists(&path("/dir/a.txt")).await.unwrap());

        provider.remove(&path("/dir/a.txt"), false).await.unwrap();
        provider.remove(&path("/dir"), false).await.unwrap();
        assert!(!provider.exists(&path("/dir")).await.unwrap());

        // Missing paths are a no-op
        provider.remove(&path("/dir"), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_release() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        provider.release().await.unwrap();
        provider.release().await.unwrap();
        let err = provider.exists(&path("/a")).await.unwrap_err();
        assert!(matches!(err, Error::Released(_)));
    }
}
