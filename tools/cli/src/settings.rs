//! Loading storage configuration from `appsettings.json`.
//!
//! The shipped `appsettings.json` only defines local storages. Cloud
//! credentials belong in `appsettings.Development.json` next to it (see
//! `appsettings.Development.json.example`), which replaces whole sections.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use storebridge_common::{Error, Result};
use storebridge_storage::{
    AzureStorageOptions, LocalStorageOptions, MemoryStorageOptions, StorageOptions,
};

/// Base settings file name.
pub const SETTINGS_FILE: &str = "appsettings.json";

/// Optional overlay read after the base file.
pub const DEVELOPMENT_SETTINGS_FILE: &str = "appsettings.Development.json";

/// Storage sections of a settings file.
///
/// A section that is absent from a file is `None`, so an overlay only
/// replaces the sections it actually defines.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    #[serde(default)]
    pub azure_storage: Option<Vec<AzureStorageOptions>>,
    #[serde(default)]
    pub local_storage: Option<Vec<LocalStorageOptions>>,
    #[serde(default)]
    pub memory_storage: Option<Vec<MemoryStorageOptions>>,
}

impl Settings {
    /// Load `appsettings.json` from `dir`, then overlay
    /// `appsettings.Development.json` if it exists.
    ///
    /// # Errors
    /// - Base file missing or unreadable
    /// - Either file is not valid JSON for these sections
    pub fn load(dir: &Path) -> Result<Self> {
        let base_path = dir.join(SETTINGS_FILE);
        let mut settings = Self::read(&base_path)?;

        let overlay_path = dir.join(DEVELOPMENT_SETTINGS_FILE);
        if overlay_path.is_file() {
            debug!("Applying settings overlay {}", overlay_path.display());
            settings.overlay(Self::read(&overlay_path)?);
        }

        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse settings from JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Replace every section `other` defines.
    pub fn overlay(&mut self, other: Settings) {
        if other.azure_storage.is_some() {
            self.azure_storage = other.azure_storage;
        }
        if other.local_storage.is_some() {
            self.local_storage = other.local_storage;
        }
        if other.memory_storage.is_some() {
            self.memory_storage = other.memory_storage;
        }
    }

    /// All configured storages: Azure, then local, then memory.
    pub fn storage_options(&self) -> Vec<StorageOptions> {
        let azure = self.azure_storage.iter().flatten().cloned().map(StorageOptions::from);
        let local = self.local_storage.iter().flatten().cloned().map(StorageOptions::from);
        let memory = self.memory_storage.iter().flatten().cloned().map(StorageOptions::from);
        azure.chain(local).chain(memory).collect()
    }
}
