//! Error types for notekeep.

use thiserror::Error;

use crate::storage;

/// Main error type for notekeep operations.
///
/// The CLI collaborator maps these variants to exit codes and messages; the
/// library itself never prints.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    SQLite(#[from] rusqlite::Error),

    /// Storage layer error (other than migrations).
    #[error("Storage error: {0}")]
    Storage(storage::Error),

    /// No migration path exists for the stored schema version.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A note could not be indexed.
    #[error("Index error for {path}: {reason}")]
    Index { path: String, reason: String },

    /// Search exceeded its latency budget before producing any result.
    #[error("Search timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    SearchTimeout { elapsed_ms: u64, budget_ms: u64 },

    /// Daily task quota reached for an identity.
    #[error("Quota exceeded for {identity}: {used}/{max} tasks today")]
    QuotaExceeded {
        identity: String,
        used: u32,
        max: u32,
    },

    /// Security policy rejection (blocked path, denied approval).
    #[error("Security error: {0}")]
    Security(String),

    /// A sanitization stage failed; nothing was transmitted.
    #[error("Sanitization failed at {stage}: {reason}")]
    Sanitization { stage: &'static str, reason: String },

    /// Task handler or dispatch failure.
    #[error("Task error: {0}")]
    Task(String),

    /// ONNX inference error.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Tokenization error.
    #[error("Tokenization error: {0}")]
    Tokenization(#[from] tokenizers::Error),

    /// ONNX session error.
    #[error("ONNX session error: {0}")]
    Onnx(#[from] ort::Error),

    /// HuggingFace Hub error.
    #[error("HuggingFace Hub error: {0}")]
    HfHub(#[from] hf_hub::api::sync::ApiError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression in a pattern set.
    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid blocked-path glob.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::Migration(msg) => Error::Migration(msg),
            other => Error::Storage(other),
        }
    }
}
