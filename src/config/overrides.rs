//! Environment variable overrides for configuration.

use crate::errors::Error;

use super::env_parser::{
    parse_env_bool, parse_env_list, parse_env_number, parse_env_path, parse_env_string, read_env,
};
use super::{Config, EmbeddingBackend};

#[cfg(test)]
use super::tests_utils::{ALL_VARS, ENV_MUTEX, cleanup_env_vars, set_env};

/// Apply `NOTEKEEP_*` environment variable overrides to configuration.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), Error> {
    if let Some(v) = read_env("NOTEKEEP_DATABASE_PATH", parse_env_path)? {
        config.database_path = v;
    }
    if let Some(v) = read_env("NOTEKEEP_NOTES_ROOT", parse_env_path)? {
        config.notes_root = v;
    }
    if let Some(v) = read_env("NOTEKEEP_EMBEDDING_MODEL", parse_env_string)? {
        config.embedding_model = v;
    }
    if let Some(v) = read_env("NOTEKEEP_EMBEDDING_BACKEND", |name, value| {
        EmbeddingBackend::parse(value)
            .ok_or_else(|| Error::Config(format!("Invalid {name} value: {value}")))
    })? {
        config.embedding_backend = v;
    }
    if let Some(v) = read_env("NOTEKEEP_SEARCH_TIMEOUT_MS", parse_env_number::<u64>)? {
        config.search_timeout_ms = v;
    }
    if let Some(v) = read_env("NOTEKEEP_INDEX_BATCH_SIZE", parse_env_number::<usize>)? {
        config.index_batch_size = v;
    }
    if let Some(v) = read_env("NOTEKEEP_POLL_INTERVAL_MS", parse_env_number::<u64>)? {
        config.poll_interval_ms = v;
    }
    if let Some(v) = read_env("NOTEKEEP_MAX_BACKOFF_MS", parse_env_number::<u64>)? {
        config.max_backoff_ms = v;
    }
    if let Some(v) = read_env("NOTEKEEP_STALE_TASK_SECS", parse_env_number::<u64>)? {
        config.stale_task_secs = v;
    }
    if let Some(v) = read_env("NOTEKEEP_DAILY_TASK_QUOTA", parse_env_number::<u32>)? {
        config.daily_task_quota = v;
    }
    if let Some(v) = read_env("NOTEKEEP_BLOCKED_PATHS", |_, value| Ok(parse_env_list(value)))? {
        config.blocked_paths = v;
    }
    if let Some(v) = read_env("NOTEKEEP_MAX_PAYLOAD_WORDS", parse_env_number::<usize>)? {
        config.max_payload_words = v;
    }
    if let Some(v) = read_env("NOTEKEEP_REQUIRE_APPROVAL", parse_env_bool)? {
        config.require_approval = v;
    }
    if let Some(v) = read_env("NOTEKEEP_IDENTITY", parse_env_string)? {
        config.identity = v;
    }
    if let Some(v) = read_env("NOTEKEEP_ANONYMIZATION_KEY", parse_env_string)? {
        config.anonymization_key = Some(v);
    }
    Ok(())
}
