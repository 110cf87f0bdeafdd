use std::path::Path;

use rbox_types::MetadataKey;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for mail object handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Owner/namespace used when the host does not name one.
    pub default_owner: String,
    /// Attribute names routed to the extended store instead of inline.
    pub extended_keys: Vec<String>,
    /// Whether prepared writes stamp the attribute layout version.
    pub stamp_version: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_owner: "default".into(),
            extended_keys: Vec::new(),
            stamp_version: true,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Route a well-known key to the extended store.
    pub fn with_extended_key(mut self, key: MetadataKey) -> Self {
        self.extended_keys.push(key.into());
        self
    }

    /// Returns `true` if attributes named `key` belong in the extended store.
    pub fn routes_extended(&self, key: &str) -> bool {
        self.extended_keys.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.default_owner, "default");
        assert!(c.extended_keys.is_empty());
        assert!(c.stamp_version);
        assert!(!c.routes_extended("V"));
    }

    #[test]
    fn parse_partial_toml() {
        let c = StoreConfig::from_toml_str(
            r#"
            default_owner = "alice"
            extended_keys = ["K", "F"]
            "#,
        )
        .unwrap();
        assert_eq!(c.default_owner, "alice");
        assert!(c.routes_extended("K"));
        assert!(!c.routes_extended("k"));
        assert!(c.stamp_version);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = StoreConfig::from_toml_str("stamp_version = \"yes\"").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stamp_version = false").unwrap();
        let c = StoreConfig::load(file.path()).unwrap();
        assert!(!c.stamp_version);
        assert_eq!(c.default_owner, "default");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn builder_adds_token() {
        let c = StoreConfig::default().with_extended_key(MetadataKey::OldKeywords);
        assert!(c.routes_extended("K"));
    }
}
