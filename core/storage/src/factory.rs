//! Backend constructors used by the storage manager.

use storebridge_common::{Result, SecretString};

use crate::blob::BlobProvider;
use crate::local::LocalProvider;
use crate::memory::MemoryProvider;
use crate::provider::StorageBackend;

/// Build a local disk backend scoped to `root`.
pub fn make_local_disk_backend(root: &str) -> Result<Box<dyn StorageBackend>> {
    Ok(Box::new(LocalProvider::new(root)?))
}

/// Build an Azure Blob Storage backend for one container.
pub fn make_cloud_blob_backend(
    account: &str,
    key: &SecretString,
    container: &str,
) -> Result<Box<dyn StorageBackend>> {
    Ok(Box::new(BlobProvider::azure(account, key, container)?))
}

/// Constructs backends for each configuration variant.
///
/// The storage manager dispatches on the configuration variant and calls
/// the matching method. Tests substitute their own factory to observe or
/// fail construction.
pub trait BackendFactory: Send + Sync {
    fn local_disk(&self, root: &str) -> Result<Box<dyn StorageBackend>>;

    fn cloud_blob(
        &self,
        account: &str,
        key: &SecretString,
        container: &str,
    ) -> Result<Box<dyn StorageBackend>>;

    fn memory(&self) -> Result<Box<dyn StorageBackend>>;
}

/// Factory building the real backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn local_disk(&self, root: &str) -> Result<Box<dyn StorageBackend>> {
        make_local_disk_backend(root)
    }

    fn cloud_blob(
        &self,
        account: &str,
        key: &SecretString,
        container: &str,
    ) -> Result<Box<dyn StorageBackend>> {
        make_cloud_blob_backend(account, key, container)
    }

    fn memory(&self) -> Result<Box<dyn StorageBackend>> {
        Ok(Box::new(MemoryProvider::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_factory_builds_each_kind() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let factory = DefaultBackendFactory;

        let local = factory.local_disk(root.to_str().unwrap()).unwrap();
        assert_eq!(local.kind(), "local");
        assert!(root.is_dir());

        let blob = factory
            .cloud_blob("acct", &SecretString::new("c2VjcmV0"), "files")
            .unwrap();
        assert_eq!(blob.kind(), "azure");

        assert_eq!(factory.memory().unwrap().kind(), "memory");
    }
}
