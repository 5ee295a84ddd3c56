//! Configuration file loading and parsing.

use crate::errors::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::EmbeddingBackend;
use super::paths;

/// Configuration loaded from TOML file. Absent keys keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub database_path: Option<PathBuf>,
    pub notes_root: Option<PathBuf>,
    pub embedding_model: Option<String>,
    pub embedding_backend: Option<EmbeddingBackend>,
    pub search_timeout_ms: Option<u64>,
    pub index_batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub stale_task_secs: Option<u64>,
    pub daily_task_quota: Option<u32>,
    pub blocked_paths: Option<Vec<String>>,
    pub max_payload_words: Option<usize>,
    pub require_approval: Option<bool>,
    pub identity: Option<String>,
    pub anonymization_key: Option<String>,
}

impl ConfigFile {
    pub(super) fn expand_paths(&mut self) {
        if let Some(path) = self.database_path.as_mut() {
            paths::expand_tilde(path);
        }
        if let Some(path) = self.notes_root.as_mut() {
            paths::expand_tilde(path);
        }
    }
}

/// `<config_dir>/notekeep/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let config_dir = dirs::config_dir().unwrap_or_else(|| home.join(".config"));
    Some(config_dir.join("notekeep/config.toml"))
}

/// Load configuration from a TOML file. A missing file is not an error.
pub fn load_from_file(config_path: &Path) -> Result<Option<ConfigFile>, Error> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(config_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {e}",
            config_path.display()
        ))
    })?;

    let config: ConfigFile = toml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {e}",
            config_path.display()
        ))
    })?;

    tracing::debug!(
        target: "notekeep.config",
        path = %config_path.display(),
        "loaded config file"
    );
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_toml() {
        let content = r#"
This is not valid TOML
 [[unclosed bracket
 "#;

        let result: Result<ConfigFile, _> = toml::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_config_file() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.database_path.is_none());
        assert!(config.blocked_paths.is_none());
        assert!(config.require_approval.is_none());
    }

    #[test]
    fn test_config_file_partial_toml() {
        let content = r#"
            database_path = "/test/db.db"
            blocked_paths = ["private/**"]
            require_approval = true
        "#;

        let config: ConfigFile = toml::from_str(content).unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/test/db.db")));
        assert_eq!(config.blocked_paths, Some(vec!["private/**".to_string()]));
        assert_eq!(config.require_approval, Some(true));
        assert!(config.search_timeout_ms.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("similarity_threshold = 0.5");
        assert!(result.is_err());
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "daily_task_quota = \"many\"").unwrap();
        assert!(matches!(load_from_file(&path), Err(Error::Config(_))));
    }
}
