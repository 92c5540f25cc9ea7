//! Storage manager: named registry of configured backends.

use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use storebridge_common::{Error, Result, StorageName};

use crate::config::StorageOptions;
use crate::facade::StorageHandle;
use crate::factory::{BackendFactory, DefaultBackendFactory};
use crate::provider::StorageBackend;

/// Owns one backend per configured logical name.
///
/// Backends are built once, during construction, and released exactly once
/// by [`StorageManager::release`]. Callers only ever see
/// [`StorageHandle`]s, which borrow the manager.
///
/// Dropping a manager that was not released drops its backends and logs a
/// warning; call `release` (or use [`StorageManager::using`]) to observe
/// release failures.
pub struct StorageManager {
    storages: HashMap<StorageName, Box<dyn StorageBackend>>,
}

impl StorageManager {
    /// Build every configured backend with the default factory.
    ///
    /// # Errors
    /// - Duplicate or unknown storage names (no backend is built)
    /// - A backend failed to build (backends built so far are released)
    pub async fn new(options: Vec<StorageOptions>) -> Result<Self> {
        Self::with_factory(options, &DefaultBackendFactory).await
    }

    /// Build every configured backend with a custom factory.
    pub async fn with_factory(
        options: Vec<StorageOptions>,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let names = Self::validate(&options)?;
        info!("Building {} storage backends", options.len());

        let mut storages: HashMap<StorageName, Box<dyn StorageBackend>> =
            HashMap::with_capacity(options.len());

        for (name, option) in names.into_iter().zip(options) {
            let built = match &option {
                StorageOptions::Local(o) => factory.local_disk(&o.root),
                StorageOptions::Azure(o) => {
                    factory.cloud_blob(&o.account_name, &o.key, &o.container_name)
                }
                StorageOptions::Memory(_) => factory.memory(),
            };

            match built {
                Ok(backend) => {
                    debug!("Built {} storage {}", option.storage_type_str(), name);
                    storages.insert(name, backend);
                }
                Err(e) => {
                    warn!("Failed to build storage {}: {}", name, e);
                    let mut partial = Self { storages };
                    if let Err(release_err) = partial.release().await {
                        warn!("Failed to release partially built storages: {}", release_err);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { storages })
    }

    /// Check that every name is known and unique, returning the parsed names
    /// in configuration order.
    fn validate(options: &[StorageOptions]) -> Result<Vec<StorageName>> {
        let mut names = Vec::with_capacity(options.len());
        let mut seen = HashSet::new();
        let mut unknown = Vec::new();
        let mut duplicates = Vec::new();

        for option in options {
            match option.name().parse::<StorageName>() {
                Ok(name) => {
                    if !seen.insert(name) {
                        duplicates.push(name.to_string());
                    }
                    names.push(name);
                }
                Err(_) => unknown.push(option.name().to_string()),
            }
        }

        if unknown.is_empty() && duplicates.is_empty() {
            return Ok(names);
        }

        let mut problems = Vec::new();
        if !duplicates.is_empty() {
            problems.push(format!("duplicate names [{}]", duplicates.join(", ")));
        }
        if !unknown.is_empty() {
            problems.push(format!("unknown names [{}]", unknown.join(", ")));
        }
        Err(Error::Config(format!(
            "Storage names must be unique and one of [{}]: {}",
            StorageName::ALL.map(|n| n.as_str()).join(", "),
            problems.join("; ")
        )))
    }

    /// Get a handle to the backend registered under `name`.
    ///
    /// # Errors
    /// - No backend is registered under `name`
    pub fn get(&self, name: StorageName) -> Result<StorageHandle<'_>> {
        self.storages
            .get(&name)
            .map(|backend| StorageHandle::new(name, backend.as_ref()))
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Get a handle by the string form of a storage name.
    pub fn lookup(&self, name: &str) -> Result<StorageHandle<'_>> {
        let parsed = name
            .parse::<StorageName>()
            .map_err(|_| Error::NotRegistered(name.to_string()))?;
        self.get(parsed)
    }

    /// Check if a backend is registered under `name`.
    pub fn contains(&self, name: StorageName) -> bool {
        self.storages.contains_key(&name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<StorageName> {
        let mut names: Vec<StorageName> = self.storages.keys().copied().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// Release every backend and empty the manager.
    ///
    /// Every backend is released even if some fail; the failures are
    /// returned together. Calling this again is a no-op.
    pub async fn release(&mut self) -> Result<()> {
        if self.storages.is_empty() {
            return Ok(());
        }

        let storages = std::mem::take(&mut self.storages);
        let count = storages.len();
        let mut failures = Vec::new();

        for (name, backend) in storages {
            if let Err(e) = backend.release().await {
                warn!("Failed to release storage {}: {}", name, e);
                failures.push((name.to_string(), e));
            }
        }

        if failures.is_empty() {
            info!("Released {} storage backends", count);
            Ok(())
        } else {
            Err(Error::Release(failures))
        }
    }

    /// Run `f` with this manager, then release it on every exit path.
    ///
    /// An error from `f` takes precedence over a release error, which is
    /// logged instead.
    ///
    /// ```no_run
    /// # use storebridge_storage::{FileStorageExt, StorageManager, StorageOptions};
    /// # use storebridge_common::{StorageName, StoragePath};
    /// # async fn run() -> storebridge_common::Result<()> {
    /// let manager = StorageManager::new(vec![StorageOptions::memory("Temp")]).await?;
    /// manager
    ///     .using(|m| Box::pin(async move {
    ///         let temp = m.get(StorageName::Temp)?;
    ///         temp.write_text(&StoragePath::parse("a.txt")?, "hi").await
    ///     }))
    ///     .await
    /// # }
    /// ```
    pub async fn using<T, E, F>(mut self, f: F) -> std::result::Result<T, E>
    where
        F: for<'m> FnOnce(&'m StorageManager) -> BoxFuture<'m, std::result::Result<T, E>>,
        E: From<Error>,
    {
        let outcome = f(&self).await;
        let released = self.release().await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Release after failure also failed: {}", release_err);
                Err(e)
            }
        }
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        if !self.storages.is_empty() {
            warn!(
                "StorageManager dropped without release; dropping {} backends",
                self.storages.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use crate::provider::{FileStorage, FileStorageExt};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use storebridge_common::{SecretString, StoragePath};
    use tempfile::TempDir;

    /// Factory building memory backends and counting constructions.
    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
        fail_cloud: bool,
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl CountingFactory {
        fn build(&self) -> Result<Box<dyn StorageBackend>> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TrackedBackend {
                inner: MemoryProvider::new(),
                releases: self.releases.clone(),
                fail_release: self.fail_release,
            }))
        }
    }

    impl BackendFactory for CountingFactory {
        fn local_disk(&self, _root: &str) -> Result<Box<dyn StorageBackend>> {
            self.build()
        }

        fn cloud_blob(
            &self,
            _account: &str,
            _key: &SecretString,
            _container: &str,
        ) -> Result<Box<dyn StorageBackend>> {
            if self.fail_cloud {
                return Err(Error::Config("cloud unavailable".to_string()));
            }
            self.build()
        }

        fn memory(&self) -> Result<Box<dyn StorageBackend>> {
            self.build()
        }
    }

    /// Memory backend recording release calls.
    struct TrackedBackend {
        inner: MemoryProvider,
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    #[async_trait]
    impl FileStorage for TrackedBackend {
        fn kind(&self) -> &str {
            self.inner.kind()
        }

        async fn exists(&self, path: &StoragePath) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn list(
            &self,
            path: Option<&StoragePath>,
            recursive: bool,
        ) -> Result<Vec<crate::Entry>> {
            self.inner.list(path, recursive).await
        }

        async fn open_read(&self, path: &StoragePath) -> Result<crate::ByteStream> {
            self.inner.open_read(path).await
        }

        async fn open_write(
            &self,
            path: &StoragePath,
            mode: crate::WriteMode,
        ) -> Result<Box<dyn crate::WriteStream>> {
            self.inner.open_write(path, mode).await
        }

        async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
            self.inner.rename(from, to).await
        }

        async fn remove(&self, path: &StoragePath, recursive: bool) -> Result<()> {
            self.inner.remove(path, recursive).await
        }
    }

    #[async_trait]
    impl StorageBackend for TrackedBackend {
        async fn release(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.inner.release().await?;
            if self.fail_release {
                return Err(Error::Storage("handle busy".to_string()));
            }
            Ok(())
        }

        fn is_released(&self) -> bool {
            self.inner.is_released()
        }
    }

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_builds_one_backend_per_entry() {
        let temp = TempDir::new().unwrap();
        let options = vec![
            StorageOptions::local("Temp", temp.path().join("se-temp").to_str().unwrap()),
            StorageOptions::local("Local", temp.path().join("se-local").to_str().unwrap()),
            StorageOptions::memory("Cloud2"),
        ];

        let mut manager = StorageManager::new(options).await.unwrap();
        assert_eq!(manager.len(), 3);
        assert_eq!(
            manager.names(),
            vec![StorageName::Local, StorageName::Temp, StorageName::Cloud2]
        );
        assert_eq!(manager.get(StorageName::Temp).unwrap().kind(), "local");
        assert_eq!(manager.lookup("Cloud2").unwrap().kind(), "memory");
        manager.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_share_the_backend() {
        let mut manager = StorageManager::new(vec![StorageOptions::memory("Temp")])
            .await
            .unwrap();

        manager
            .get(StorageName::Temp)
            .unwrap()
            .write_text(&path("/a.txt"), "shared")
            .await
            .unwrap();
        let again = manager.get(StorageName::Temp).unwrap();
        assert_eq!(again.read_text(&path("/a.txt")).await.unwrap(), "shared");
        assert_eq!(again.name(), StorageName::Temp);

        manager.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_names_build_nothing() {
        let factory = CountingFactory::default();
        let options = vec![
            StorageOptions::memory("Temp"),
            StorageOptions::memory("Local"),
            StorageOptions::memory("Temp"),
        ];

        let err = StorageManager::with_factory(options, &factory)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("duplicate names [Temp]")));
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_alias_duplicates_are_detected() {
        let factory = CountingFactory::default();
        let options = vec![
            StorageOptions::memory("Temp"),
            StorageOptions::memory("TempStorage"),
        ];
        assert!(StorageManager::with_factory(options, &factory).await.is_err());
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_names_build_nothing() {
        let factory = CountingFactory::default();
        let options = vec![
            StorageOptions::memory("Temp"),
            StorageOptions::memory("Attic"),
        ];

        let err = StorageManager::with_factory(options, &factory)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("unknown names [Attic]")));
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_construction_releases_built_backends() {
        let factory = CountingFactory {
            fail_cloud: true,
            ..Default::default()
        };
        let options = vec![
            StorageOptions::memory("Temp"),
            StorageOptions::local("Local", "/unused"),
            StorageOptions::azure("Cloud1", "acct", "c2VjcmV0", "files"),
        ];

        let err = StorageManager::with_factory(options, &factory)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg == "cloud unavailable"));
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        assert_eq!(factory.releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_configuration_is_valid() {
        let mut manager = StorageManager::new(Vec::new()).await.unwrap();
        assert!(manager.is_empty());
        manager.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_lookup_fails() {
        let mut manager = StorageManager::new(vec![StorageOptions::memory("Temp")])
            .await
            .unwrap();

        let err = manager.get(StorageName::Cloud1).unwrap_err();
        assert!(matches!(err, Error::NotRegistered(ref n) if n == "Cloud1"));
        let err = manager.lookup("Attic").unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
        assert!(!manager.contains(StorageName::Cloud1));

        manager.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let factory = CountingFactory::default();
        let mut manager = StorageManager::with_factory(
            vec![StorageOptions::memory("Temp"), StorageOptions::memory("Local")],
            &factory,
        )
        .await
        .unwrap();

        manager.release().await.unwrap();
        manager.release().await.unwrap();
        assert_eq!(factory.releases.load(Ordering::SeqCst), 2);
        assert!(manager.is_empty());
        assert!(matches!(
            manager.get(StorageName::Temp).unwrap_err(),
            Error::NotRegistered(_)
        ));
    }

    #[tokio::test]
    async fn test_release_attempts_every_backend() {
        let factory = CountingFactory {
            fail_release: true,
            ..Default::default()
        };
        let mut manager = StorageManager::with_factory(
            vec![
                StorageOptions::memory("Temp"),
                StorageOptions::memory("Local"),
                StorageOptions::memory("Cloud1"),
            ],
            &factory,
        )
        .await
        .unwrap();

        let err = manager.release().await.unwrap_err();
        match err {
            Error::Release(failures) => assert_eq!(failures.len(), 3),
            other => panic!("Expected Release error, got {:?}", other),
        }
        assert_eq!(factory.releases.load(Ordering::SeqCst), 3);
        manager.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_using_releases_on_error() {
        let factory = CountingFactory::default();
        let manager = StorageManager::with_factory(vec![StorageOptions::memory("Temp")], &factory)
            .await
            .unwrap();

        let result: Result<()> = manager
            .using(|m| {
                Box::pin(async move {
                    m.get(StorageName::Cloud2)?;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(Error::NotRegistered(_))));
        assert_eq!(factory.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_does_not_panic() {
        let manager = StorageManager::new(vec![StorageOptions::memory("Temp")])
            .await
            .unwrap();
        drop(manager);
    }
}
