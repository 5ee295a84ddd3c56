//! Shared test utilities for config module tests.

use std::sync::Mutex;

/// Mutex to serialize environment variable tests and prevent race conditions.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Every variable read by the override layer.
pub const ALL_VARS: &[&str] = &[
    "NOTEKEEP_DATABASE_PATH",
    "NOTEKEEP_NOTES_ROOT",
    "NOTEKEEP_EMBEDDING_MODEL",
    "NOTEKEEP_EMBEDDING_BACKEND",
    "NOTEKEEP_SEARCH_TIMEOUT_MS",
    "NOTEKEEP_INDEX_BATCH_SIZE",
    "NOTEKEEP_POLL_INTERVAL_MS",
    "NOTEKEEP_MAX_BACKOFF_MS",
    "NOTEKEEP_STALE_TASK_SECS",
    "NOTEKEEP_DAILY_TASK_QUOTA",
    "NOTEKEEP_BLOCKED_PATHS",
    "NOTEKEEP_MAX_PAYLOAD_WORDS",
    "NOTEKEEP_REQUIRE_APPROVAL",
    "NOTEKEEP_IDENTITY",
    "NOTEKEEP_ANONYMIZATION_KEY",
];

/// Set a variable. Callers hold [`ENV_MUTEX`].
pub fn set_env(var: &str, value: &str) {
    // SAFETY: config tests serialize environment access through ENV_MUTEX.
    unsafe { std::env::set_var(var, value) };
}

/// Clean up environment variables used by notekeep config.
pub fn cleanup_env_vars(vars: &[&str]) {
    for var in vars {
        // SAFETY: config tests serialize environment access through ENV_MUTEX.
        unsafe { std::env::remove_var(var) };
    }
}
