//! Object store (cloud blob) storage provider.
//!
//! Folders do not exist in object stores: a folder is the set of objects
//! sharing a key prefix. Listing a missing folder therefore returns an empty
//! list instead of failing.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::buffered::BufWriter;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore, RetryConfig};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::provider::{ByteStream, Entry, FileStorage, StorageBackend, WriteMode, WriteStream};
use storebridge_common::{Error, Result, SecretString, StoragePath};

/// Request timeout for cloud clients.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1200);
/// Connect timeout for cloud clients.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage provider backed by any `object_store` implementation.
pub struct BlobProvider {
    kind: &'static str,
    description: String,
    store: RwLock<Option<Arc<dyn ObjectStore>>>,
}

impl BlobProvider {
    /// Wrap an existing object store.
    pub fn new(kind: &'static str, description: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            kind,
            description: description.into(),
            store: RwLock::new(Some(store)),
        }
    }

    /// Create an Azure Blob Storage provider for one container.
    ///
    /// The client is built without contacting the service; credential
    /// problems surface on the first request. Retries are disabled so
    /// failures reach the caller unchanged.
    ///
    /// # Errors
    /// - Empty account or container name
    /// - Malformed access key
    pub fn azure(account: &str, key: &SecretString, container: &str) -> Result<Self> {
        if account.is_empty() {
            return Err(Error::Config("Azure storage requires an account name".to_string()));
        }
        if container.is_empty() {
            return Err(Error::Config("Azure storage requires a container name".to_string()));
        }

        let client_options = ClientOptions::default()
            .with_timeout(REQUEST_TIMEOUT)
            .with_connect_timeout(CONNECT_TIMEOUT);
        let retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };

        let store = MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_access_key(key.expose())
            .with_container_name(container)
            .with_client_options(client_options)
            .with_retry(retry)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create Azure store: {}", e)))?;

        Ok(Self::new(
            "azure",
            format!("azure://{}/{}", account, container),
            Arc::new(store),
        ))
    }

    /// Create a provider over an in-process object store.
    pub fn in_memory() -> Self {
        Self::new("memory-blob", "memory://", Arc::new(InMemory::new()))
    }

    fn store(&self) -> Result<Arc<dyn ObjectStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Released(self.description.clone()))
    }

    fn to_object_path(path: &StoragePath) -> ObjectPath {
        ObjectPath::from_iter(path.components().iter().map(|c| c.as_str()))
    }

    fn to_storage_path(location: &ObjectPath) -> Result<StoragePath> {
        StoragePath::from_components(location.parts().map(|p| p.as_ref().to_string()).collect())
    }

    fn prefix(path: &StoragePath) -> Option<ObjectPath> {
        if path.is_root() {
            None
        } else {
            Some(Self::to_object_path(path))
        }
    }

    fn map_error(path: &StoragePath, err: object_store::Error) -> Error {
        match err {
            object_store::Error::NotFound { .. } => {
                Error::NotFound(format!("File not found: {}", path))
            }
            object_store::Error::AlreadyExists { .. } => {
                Error::AlreadyExists(format!("Already exists: {}", path))
            }
            other => Error::Storage(other.to_string()),
        }
    }

    /// Metadata of the object stored exactly at `path`, if any.
    async fn head(store: &Arc<dyn ObjectStore>, path: &StoragePath) -> Result<Option<ObjectMeta>> {
        if path.is_root() {
            return Ok(None);
        }
        match store.head(&Self::to_object_path(path)).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Self::map_error(path, e)),
        }
    }

    /// Every object below `path`.
    async fn objects_below(store: &Arc<dyn ObjectStore>, path: &StoragePath) -> Result<Vec<ObjectMeta>> {
        let prefix = Self::prefix(path);
        store
            .list(prefix.as_ref())
            .map_err(|e| Self::map_error(path, e))
            .try_collect()
            .await
    }

    async fn has_objects_below(store: &Arc<dyn ObjectStore>, path: &StoragePath) -> Result<bool> {
        let prefix = Self::prefix(path);
        let mut listing = store.list(prefix.as_ref());
        match listing.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(Self::map_error(path, e)),
            None => Ok(false),
        }
    }

    fn file_entry(meta: &ObjectMeta) -> Result<Entry> {
        Ok(Entry::file(
            Self::to_storage_path(&meta.location)?,
            meta.size as u64,
            Some(meta.last_modified),
        ))
    }
}

/// Write stream uploading through `object_store`'s buffered writer.
///
/// Small objects are uploaded in one request on commit, larger ones as a
/// multipart upload. Nothing becomes visible before commit.
struct BlobWriteStream {
    writer: BufWriter,
    path: StoragePath,
}

#[async_trait]
impl WriteStream for BlobWriteStream {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_all(chunk).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.writer.shutdown().await?;
        debug!("Committed blob {}", this.path);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let path = this.path.clone();
        this.writer
            .abort()
            .await
            .map_err(|e| BlobProvider::map_error(&path, e))
    }
}

#[async_trait]
impl FileStorage for BlobProvider {
    fn kind(&self) -> &str {
        self.kind
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        let store = self.store()?;
        if path.is_root() {
            return Ok(true);
        }
        if Self::head(&store, path).await?.is_some() {
            return Ok(true);
        }
        Self::has_objects_below(&store, path).await
    }

    async fn list(&self, path: Option<&StoragePath>, recursive: bool) -> Result<Vec<Entry>> {
        let store = self.store()?;
        let root = StoragePath::root();
        let path = path.unwrap_or(&root);

        if Self::head(&store, path).await?.is_some() {
            return Err(Error::InvalidOperation(format!("Not a folder: {}", path)));
        }

        let mut results = Vec::new();
        if recursive {
            let mut folders = BTreeSet::new();
            for meta in Self::objects_below(&store, path).await? {
                let entry = Self::file_entry(&meta)?;
                let mut folder = entry.path.parent();
                while let Some(current) = folder {
                    if current.components().len() <= path.components().len() {
                        break;
                    }
                    folder = current.parent();
                    folders.insert(current);
                }
                results.push(entry);
            }
            results.extend(folders.into_iter().map(Entry::directory));
        } else {
            let prefix = Self::prefix(path);
            let listing = store
                .list_with_delimiter(prefix.as_ref())
                .await
                .map_err(|e| Self::map_error(path, e))?;
            for folder in &listing.common_prefixes {
                results.push(Entry::directory(Self::to_storage_path(folder)?));
            }
            for meta in &listing.objects {
                results.push(Self::file_entry(meta)?);
            }
        }

        Ok(results)
    }

    async fn open_read(&self, path: &StoragePath) -> Result<ByteStream> {
        let store = self.store()?;
        if path.is_root() {
            return Err(Error::InvalidOperation("Cannot read the root".to_string()));
        }

        let result = match store.get(&Self::to_object_path(path)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                if Self::has_objects_below(&store, path).await? {
                    return Err(Error::InvalidOperation(format!(
                        "Cannot read folder: {}",
                        path
                    )));
                }
                return Err(Error::NotFound(format!("File not found: {}", path)));
            }
            Err(e) => return Err(Self::map_error(path, e)),
        };

        let path = path.clone();
        let stream = result
            .into_stream()
            .map_err(move |e| Self::map_error(&path, e));
        Ok(Box::pin(stream))
    }

    async fn open_write(&self, path: &StoragePath, mode: WriteMode) -> Result<Box<dyn WriteStream>> {
        let store = self.store()?;
        if path.is_root() {
            return Err(Error::InvalidOperation("Cannot write to the root".to_string()));
        }

        let mut writer = BufWriter::new(store.clone(), Self::to_object_path(path));

        // Object stores cannot append in place: re-upload existing content first.
        if mode == WriteMode::Append {
            match store.get(&Self::to_object_path(path)).await {
                Ok(existing) => {
                    let bytes = existing
                        .bytes()
                        .await
                        .map_err(|e| Self::map_error(path, e))?;
                    writer.write_all(&bytes).await?;
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(Self::map_error(path, e)),
            }
        }

        Ok(Box::new(BlobWriteStream {
            writer,
            path: path.clone(),
        }))
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let store = self.store()?;

        if Self::head(&store, from).await?.is_some() {
            return store
                .rename(&Self::to_object_path(from), &Self::to_object_path(to))
                .await
                .map_err(|e| Self::map_error(from, e));
        }

        let objects = Self::objects_below(&store, from).await?;
        if objects.is_empty() || from.is_root() {
            return Err(Error::NotFound(format!("Source not found: {}", from)));
        }
        for meta in objects {
            let old = Self::to_storage_path(&meta.location)?;
            let Some(relative) = old.strip_prefix(from) else {
                continue;
            };
            let new = to.join_path(&relative);
            store
                .rename(&meta.location, &Self::to_object_path(&new))
                .await
                .map_err(|e| Self::map_error(&old, e))?;
        }
        Ok(())
    }

    async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        let store = self.store()?;

        if Self::head(&store, path).await?.is_some() {
            return match store.delete(&Self::to_object_path(path)).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(path, e)),
            };
        }

        if !Self::has_objects_below(&store, path).await? {
            return Ok(());
        }
        if !recursive {
            return Err(Error::InvalidOperation(format!("Folder not empty: {}", path)));
        }

        for meta in Self::objects_below(&store, path).await? {
            match store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(Self::map_error(path, e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for BlobProvider {
    async fn release(&self) -> Result<()> {
        let store = self
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if store.is_some() {
            debug!("Released blob storage {}", self.description);
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
