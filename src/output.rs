//! JSON response types and formatting for CLI output.

use serde::Serialize;

use notekeep::{Error, StopOutcome, TaskType};

/// Response for a queued task.
#[derive(Serialize)]
pub struct EnqueueResponse {
    pub status: String,
    pub id: i64,
    pub task_type: TaskType,
}

/// Response for a written graph export.
#[derive(Serialize)]
pub struct ExportResponse {
    pub status: String,
    pub path: String,
}

/// Response when a worker run ends.
#[derive(Serialize)]
pub struct WorkerExitResponse {
    pub status: String,
    pub outcome: StopOutcome,
    pub processed: usize,
}

/// Response for errors.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
            kind: error_kind(err),
        }
    }
}

/// Stable machine-readable name for an error variant.
pub fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Index { .. } => "index",
        Error::SearchTimeout { .. } => "search_timeout",
        Error::QuotaExceeded { .. } => "quota_exceeded",
        Error::Sanitization { .. } => "sanitization",
        Error::Migration(_) => "migration",
        Error::Security(_) => "security",
        Error::Config(_) => "config",
        Error::InvalidInput(_) => "invalid_input",
        _ => "internal",
    }
}

/// Print a value as formatted JSON to stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize JSON: {e}");
            std::process::exit(1);
        }
    }
}

/// Print a value as one compact JSON line, for streamed events.
pub fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize JSON: {e}"),
    }
}
