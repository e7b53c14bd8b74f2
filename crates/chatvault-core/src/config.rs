use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VaultError};

/// Top-level configuration for the chat archive.
///
/// Loaded from `~/.chatvault/config.toml` by default. Every section and
/// field falls back to its default when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

impl VaultConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VaultConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VaultError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Absolute path of the SQLite database file.
    ///
    /// A relative `storage.database_file` is resolved against the data dir.
    pub fn database_path(&self) -> PathBuf {
        resolve_in(&self.general.data_dir, &self.storage.database_file)
    }

    /// Absolute path of the managed media directory.
    pub fn media_dir(&self) -> PathBuf {
        resolve_in(&self.general.data_dir, &self.storage.media_dir)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the database and the media directory.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.chatvault/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Store location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file, relative to `general.data_dir` unless absolute.
    pub database_file: String,
    /// Managed media directory, relative to `general.data_dir` unless absolute.
    pub media_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "chatvault.db".to_string(),
            media_dir: "media".to_string(),
        }
    }
}

/// Import defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Chat name used when the caller gives none.
    pub default_chat_name: String,
    /// Read attachment sizes from the export directory during import.
    pub compute_media_size: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_chat_name: "<no name>".to_string(),
            compute_media_size: true,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

fn resolve_in(base: &str, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        expand_home(base).join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.general.data_dir, "~/.chatvault/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.database_file, "chatvault.db");
        assert_eq!(config.storage.media_dir, "media");
        assert_eq!(config.import.default_chat_name, "<no name>");
        assert!(config.import.compute_media_size);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[storage]
database_file = "archive.sqlite"
media_dir = "/srv/media"
"#;
        let file = create_temp_config(content);
        let config = VaultConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/data/archive.sqlite")
        );
        assert_eq!(config.media_dir(), PathBuf::from("/srv/media"));
        // Missing section falls back to defaults.
        assert_eq!(config.import.default_chat_name, "<no name>");
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = VaultConfig::load(file.path());
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::load_or_default(&dir.path().join("missing.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_config_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("config.toml");

        let mut config = VaultConfig::default();
        config.import.default_chat_name = "Family".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = VaultConfig::load(&path).unwrap();
        assert_eq!(reloaded.import.default_chat_name, "Family");
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home("rel/x"), PathBuf::from("rel/x"));
    }
}
