//! Common types used throughout StoreBridge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Logical name of a configured storage.
///
/// The set is closed: configuration entries must use one of these names,
/// and every name may be configured at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageName {
    #[serde(alias = "LocalStorage")]
    Local,
    #[serde(alias = "TempStorage")]
    Temp,
    Cloud1,
    Cloud2,
}

impl StorageName {
    /// Every known storage name.
    pub const ALL: [StorageName; 4] = [
        StorageName::Local,
        StorageName::Temp,
        StorageName::Cloud1,
        StorageName::Cloud2,
    ];

    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageName::Local => "Local",
            StorageName::Temp => "Temp",
            StorageName::Cloud1 => "Cloud1",
            StorageName::Cloud2 => "Cloud2",
        }
    }
}

impl FromStr for StorageName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "Local" | "LocalStorage" => Ok(StorageName::Local),
            "Temp" | "TempStorage" => Ok(StorageName::Temp),
            "Cloud1" => Ok(StorageName::Cloud1),
            "Cloud2" => Ok(StorageName::Cloud2),
            _ => Err(crate::Error::Config(format!(
                "'{}' is not a known storage name",
                s
            ))),
        }
    }
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path within a storage, relative to the storage root.
///
/// The same path addresses different physical locations on different
/// storages; it carries no backend information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, `.`, `..`, or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a StoragePath.
    ///
    /// Both `/` and `\` separate components. Empty and `.` segments are
    /// dropped, so `"/a//./b/"` parses to `/a/b`. `..` is rejected.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let mut components = Vec::new();
        for segment in path.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Path must not contain '..': {}",
                        path
                    )));
                }
                _ => components.push(segment.to_string()),
            }
        }
        Ok(Self { components })
    }

    fn validate_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() || comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid path component: '{}'",
                comp
            )));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/folder name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Append every component of `other` to this path.
    pub fn join_path(&self, other: &StoragePath) -> Self {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Self { components }
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &StoragePath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// The remainder of this path below `prefix`.
    pub fn strip_prefix(&self, prefix: &StoragePath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            components: self.components[prefix.components.len()..].to_vec(),
        })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation with a leading `/`.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }

    /// Convert to a key without a leading `/` (empty for the root).
    pub fn to_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl FromStr for StoragePath {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Secret string (access keys) that zeroizes on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for handing to a client library.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} bytes])", self.0.len())
    }
}
