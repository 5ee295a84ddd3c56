//! Configuration system for notekeep.

mod env_parser;
mod loader;
mod overrides;
mod paths;
mod validation;

#[cfg(test)]
mod tests_utils;
#[cfg(test)]
use tests_utils::ENV_MUTEX;

use crate::errors::Error;
use crate::tasks::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use loader::{ConfigFile, default_config_path};

/// Which embedder the engine builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// ONNX model fetched from the HuggingFace Hub.
    Onnx,
    /// Model-free hashing embedder.
    Hash,
    /// Lexical search only.
    None,
}

impl EmbeddingBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "onnx" => Some(Self::Onnx),
            "hash" => Some(Self::Hash),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

/// Configuration values with priority: defaults < config file < env vars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Path to the SQLite database.
    pub database_path: PathBuf,
    /// Directory scanned for notes.
    pub notes_root: PathBuf,
    /// HuggingFace embedding model identifier.
    pub embedding_model: String,
    pub embedding_backend: EmbeddingBackend,
    /// Search latency budget.
    pub search_timeout_ms: u64,
    /// Files committed per indexing transaction.
    pub index_batch_size: usize,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Claims older than this are requeued when the worker starts.
    pub stale_task_secs: u64,
    /// Tasks admitted per identity per UTC day.
    pub daily_task_quota: u32,
    /// Globs for notes that must never be sent to a provider.
    pub blocked_paths: Vec<String>,
    pub max_payload_words: usize,
    /// Tasks run only once approved via `NOTEKEEP_APPROVED_TASKS`.
    pub require_approval: bool,
    /// Quota identity.
    pub identity: String,
    /// Anonymization secret. Generated and stored in the database when unset.
    #[serde(skip_serializing)]
    pub anonymization_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        // Use home directory with sensible fallback for systems without HOME
        let home = dirs::home_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        let notekeep_dir = home.join(".notekeep");

        Self {
            database_path: notekeep_dir.join("notekeep.db"),
            notes_root: home.join("notes"),
            embedding_model: "BAAI/bge-small-en-v1.5".to_string(),
            embedding_backend: EmbeddingBackend::Onnx,
            search_timeout_ms: 2000,
            index_batch_size: 64,
            poll_interval_ms: 1000,
            max_backoff_ms: 30_000,
            stale_task_secs: 600,
            daily_task_quota: 100,
            blocked_paths: vec![
                "credentials/*".to_string(),
                "secrets/**".to_string(),
                "*.pem".to_string(),
                "*.key".to_string(),
                ".env".to_string(),
            ],
            max_payload_words: 2000,
            require_approval: false,
            identity: crate::sanitize::os_username().unwrap_or_else(|| "local".to_string()),
            anonymization_key: None,
        }
    }
}

impl Config {
    /// Load configuration with defaults, the user config file, and environment overrides.
    pub fn load() -> Result<Self, Error> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Like [`Config::load`] but reading the TOML file at `path` when given.
    pub fn load_from(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = Config::default();

        if let Some(path) = path {
            if let Some(mut file) = loader::load_from_file(path)? {
                file.expand_paths();
                config.merge_from_file(file);
            }
        }

        overrides::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Merge configuration from a file into this config.
    fn merge_from_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.database_path {
            self.database_path = v;
        }
        if let Some(v) = file.notes_root {
            self.notes_root = v;
        }
        if let Some(v) = file.embedding_model {
            self.embedding_model = v;
        }
        if let Some(v) = file.embedding_backend {
            self.embedding_backend = v;
        }
        if let Some(v) = file.search_timeout_ms {
            self.search_timeout_ms = v;
        }
        if let Some(v) = file.index_batch_size {
            self.index_batch_size = v;
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file.max_backoff_ms {
            self.max_backoff_ms = v;
        }
        if let Some(v) = file.stale_task_secs {
            self.stale_task_secs = v;
        }
        if let Some(v) = file.daily_task_quota {
            self.daily_task_quota = v;
        }
        if let Some(v) = file.blocked_paths {
            self.blocked_paths = v;
        }
        if let Some(v) = file.max_payload_words {
            self.max_payload_words = v;
        }
        if let Some(v) = file.require_approval {
            self.require_approval = v;
        }
        if let Some(v) = file.identity {
            self.identity = v;
        }
        if file.anonymization_key.is_some() {
            self.anonymization_key = file.anonymization_key;
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        validation::ConfigValidator { config: self }.validate()
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            stale_after: Duration::from_secs(self.stale_task_secs),
        }
    }

    /// Ensure the parent directory of the database exists.
    pub fn ensure_directories(&self) -> Result<(), Error> {
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::tests_utils::{ALL_VARS, cleanup_env_vars, set_env};

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.database_path.ends_with(".notekeep/notekeep.db"));
        assert_eq!(config.embedding_model, "BAAI/bge-small-en-v1.5");
        assert_eq!(config.embedding_backend, EmbeddingBackend::Onnx);
        assert_eq!(config.search_timeout_ms, 2000);
        assert_eq!(config.index_batch_size, 64);
        assert_eq!(config.max_payload_words, 2000);
        assert!(config.blocked_paths.contains(&"credentials/*".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        cleanup_env_vars(ALL_VARS);

        let config = Config::load_from(None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_then_env_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();
        cleanup_env_vars(ALL_VARS);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "notes_root = \"/srv/notes\"\ndaily_task_quota = 5\nembedding_backend = \"hash\"\n",
        )
        .unwrap();
        set_env("NOTEKEEP_DAILY_TASK_QUOTA", "7");

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.notes_root, PathBuf::from("/srv/notes"));
        assert_eq!(config.embedding_backend, EmbeddingBackend::Hash);
        assert_eq!(config.daily_task_quota, 7);

        cleanup_env_vars(ALL_VARS);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        cleanup_env_vars(ALL_VARS);

        let config = Config::load_from(Some(Path::new("/nonexistent/notekeep.toml"))).unwrap();
        assert_eq!(config.search_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_env_fails_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        cleanup_env_vars(ALL_VARS);

        set_env("NOTEKEEP_INDEX_BATCH_SIZE", "0");
        assert!(matches!(Config::load_from(None), Err(Error::Config(_))));

        cleanup_env_vars(ALL_VARS);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(EmbeddingBackend::parse("ONNX"), Some(EmbeddingBackend::Onnx));
        assert_eq!(EmbeddingBackend::parse("off"), Some(EmbeddingBackend::None));
        assert_eq!(EmbeddingBackend::parse("gpu"), None);
    }

    #[test]
    fn test_worker_config_conversion() {
        let config = Config::default();
        let worker = config.worker_config();
        assert_eq!(worker.poll_interval, Duration::from_millis(1000));
        assert_eq!(worker.max_backoff, Duration::from_millis(30_000));
        assert_eq!(worker.stale_after, Duration::from_secs(600));
    }
}
