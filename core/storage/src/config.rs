//! Storage configuration variants.

use serde::{Deserialize, Serialize};

use storebridge_common::SecretString;

/// Local filesystem storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageOptions {
    /// Logical storage name.
    #[serde(alias = "Name")]
    pub name: String,
    /// Root directory, absolute or relative to the working directory.
    #[serde(alias = "Root")]
    pub root: String,
}

/// Azure Blob Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureStorageOptions {
    /// Logical storage name.
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "AccountName")]
    pub account_name: String,
    /// Storage account access key.
    #[serde(alias = "Key")]
    pub key: SecretString,
    #[serde(alias = "ContainerName")]
    pub container_name: String,
}

/// In-memory storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStorageOptions {
    /// Logical storage name.
    #[serde(alias = "Name")]
    pub name: String,
}

/// Configuration of one storage backend.
///
/// ```
/// use storebridge_storage::StorageOptions;
///
/// let options: StorageOptions = serde_json::from_str(
///     r#"{ "type": "local", "name": "Temp", "root": "/tmp/se-temp" }"#,
/// ).unwrap();
/// assert_eq!(options.name(), "Temp");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageOptions {
    Local(LocalStorageOptions),
    Azure(AzureStorageOptions),
    Memory(MemoryStorageOptions),
}

impl StorageOptions {
    /// Local filesystem storage rooted at `root`.
    pub fn local(name: impl Into<String>, root: impl Into<String>) -> Self {
        StorageOptions::Local(LocalStorageOptions {
            name: name.into(),
            root: root.into(),
        })
    }

    /// Azure Blob Storage container.
    pub fn azure(
        name: impl Into<String>,
        account_name: impl Into<String>,
        key: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        StorageOptions::Azure(AzureStorageOptions {
            name: name.into(),
            account_name: account_name.into(),
            key: SecretString::new(key),
            container_name: container_name.into(),
        })
    }

    /// In-memory storage.
    pub fn memory(name: impl Into<String>) -> Self {
        StorageOptions::Memory(MemoryStorageOptions { name: name.into() })
    }

    /// The raw logical name of this entry.
    pub fn name(&self) -> &str {
        match self {
            StorageOptions::Local(o) => &o.name,
            StorageOptions::Azure(o) => &o.name,
            StorageOptions::Memory(o) => &o.name,
        }
    }

    /// Backend type as a string.
    pub fn storage_type_str(&self) -> &'static str {
        match self {
            StorageOptions::Local(_) => "local",
            StorageOptions::Azure(_) => "azure",
            StorageOptions::Memory(_) => "memory",
        }
    }
}

impl From<LocalStorageOptions> for StorageOptions {
    fn from(options: LocalStorageOptions) -> Self {
        StorageOptions::Local(options)
    }
}

impl From<AzureStorageOptions> for StorageOptions {
    fn from(options: AzureStorageOptions) -> Self {
        StorageOptions::Azure(options)
    }
}

impl From<MemoryStorageOptions> for StorageOptions {
    fn from(options: MemoryStorageOptions) -> Self {
        StorageOptions::Memory(options)
    }
}
