//! Configuration validation logic.

use crate::errors::Error;
use glob::Pattern;

use super::{Config, EmbeddingBackend};

const MAX_BATCH_SIZE: usize = 10_000;

/// Validates configuration values.
pub struct ConfigValidator<'a> {
    pub config: &'a Config,
}

impl ConfigValidator<'_> {
    /// Validate all configuration values for correctness and constraints.
    ///
    /// Checks that:
    /// - Paths and the quota identity are not empty
    /// - The embedding model is set when the ONNX backend is selected
    /// - Timeouts, batch sizes and word limits are positive
    /// - The backoff cap is not below the poll interval
    /// - Every blocked path is a valid glob
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any validation check fails.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_paths()?;
        self.validate_embedding_model()?;
        self.validate_limits()?;
        self.validate_worker_timing()?;
        self.validate_blocked_paths()?;

        Ok(())
    }

    fn validate_paths(&self) -> Result<(), Error> {
        if self.config.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }
        if self.config.notes_root.as_os_str().is_empty() {
            return Err(Error::Config("Notes root cannot be empty".to_string()));
        }
        if self.config.identity.trim().is_empty() {
            return Err(Error::Config("Identity cannot be empty".to_string()));
        }

        Ok(())
    }

    fn validate_embedding_model(&self) -> Result<(), Error> {
        if self.config.embedding_backend == EmbeddingBackend::Onnx
            && self.config.embedding_model.trim().is_empty()
        {
            return Err(Error::Config("Embedding model cannot be empty".to_string()));
        }

        Ok(())
    }

    fn validate_limits(&self) -> Result<(), Error> {
        let c = self.config;
        if c.search_timeout_ms == 0 {
            return Err(Error::Config(
                "Invalid search_timeout_ms: must be greater than 0".to_string(),
            ));
        }
        if c.index_batch_size == 0 || c.index_batch_size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Invalid index_batch_size: {} (must be between 1 and {MAX_BATCH_SIZE})",
                c.index_batch_size
            )));
        }
        if c.max_payload_words == 0 {
            return Err(Error::Config(
                "Invalid max_payload_words: must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_worker_timing(&self) -> Result<(), Error> {
        let c = self.config;
        if c.poll_interval_ms == 0 {
            return Err(Error::Config(
                "Invalid poll_interval_ms: must be greater than 0".to_string(),
            ));
        }
        if c.max_backoff_ms < c.poll_interval_ms {
            return Err(Error::Config(format!(
                "Invalid max_backoff_ms: {} (must be at least poll_interval_ms {})",
                c.max_backoff_ms, c.poll_interval_ms
            )));
        }

        Ok(())
    }

    fn validate_blocked_paths(&self) -> Result<(), Error> {
        for glob in &self.config.blocked_paths {
            Pattern::new(glob)
                .map_err(|e| Error::Config(format!("Invalid blocked path '{glob}': {e}")))?;
        }

        Ok(())
    }
}
