//! AI task queue and background execution.
//!
//! Tasks are sanitized and quota-checked when queued, stored durably in
//! `ai_task_queue`, and executed by a single [`Worker`] thread. Delivery is
//! at-least-once: a task interrupted mid-run is requeued when the worker
//! next starts.

pub mod handlers;
pub mod provider;
pub mod worker;

pub use handlers::{
    AuditSink, ClassifyHandler, HandlerRegistry, SummarizeHandler, SynthesizeHandler,
    TaskContext, TaskHandler,
};
pub use provider::{AiProvider, Classification, LocalProvider};
pub use worker::{StopOutcome, Worker, WorkerConfig, WorkerStatus};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::Error;
use crate::quota::Enforcer;
use crate::sanitize::Pipeline;
use crate::storage::queue::{TaskStatus, TaskType, insert_task};
use crate::storage::{Database, timestamp_now};

/// Emitted to subscribers when a task finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Caller-supplied task payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRequest {
    /// Inline text. Takes precedence over `path` for classify/summarize.
    #[serde(default)]
    pub content: Option<String>,
    /// Indexed note whose content is used when `content` is absent.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Notes to synthesize.
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub max_words: Option<usize>,
}

/// Admission path for new tasks.
pub struct TaskQueue {
    enforcer: Enforcer,
    sanitizer: Arc<Pipeline>,
    identity: String,
}

impl TaskQueue {
    pub fn new(enforcer: Enforcer, sanitizer: Arc<Pipeline>, identity: impl Into<String>) -> Self {
        Self {
            enforcer,
            sanitizer,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Validate, sanitize and queue a task. Returns the new task id.
    ///
    /// Nothing is written unless every check passes: blocked paths raise
    /// [`Error::Security`], a spent quota raises [`Error::QuotaExceeded`],
    /// and sanitizer failures raise [`Error::Sanitization`].
    pub fn enqueue(
        &self,
        db: &mut Database,
        task_type: TaskType,
        payload: &Value,
    ) -> Result<i64, Error> {
        let request: TaskRequest = serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidInput(format!("{task_type} payload: {e}")))?;

        for path in request.path.iter().chain(&request.notes) {
            self.enforcer.check_path(path)?;
        }

        let stored = self.build_payload(db, task_type, &request)?;
        let stored = serde_json::to_string(&stored)?;

        let created_at = timestamp_now();
        let admitted = db.write(|tx| {
            let Some(used) = self.enforcer.admit(tx, &self.identity)? else {
                return Ok(None);
            };
            let id = insert_task(tx, task_type, &stored, &created_at)?;
            Ok(Some((id, used)))
        })?;

        let Some((id, used)) = admitted else {
            tracing::warn!(
                target: "notekeep.tasks",
                op = "enqueue",
                identity = %self.identity,
                max = self.enforcer.daily_quota(),
                "daily quota exceeded"
            );
            return Err(self.enforcer.exceeded(&self.identity));
        };

        tracing::info!(
            target: "notekeep.tasks",
            op = "enqueue",
            task_id = id,
            task_type = %task_type,
            quota_used = used,
            "task queued"
        );
        Ok(id)
    }

    /// Resolve note references and sanitize every piece of content.
    fn build_payload(
        &self,
        db: &Database,
        task_type: TaskType,
        request: &TaskRequest,
    ) -> Result<Value, Error> {
        match task_type {
            TaskType::Classify | TaskType::Summarize => {
                if task_type == TaskType::Classify && request.categories.is_empty() {
                    return Err(Error::InvalidInput(
                        "classify payload needs non-empty 'categories'".to_string(),
                    ));
                }
                let content = match (&request.content, &request.path) {
                    (Some(content), _) => content.clone(),
                    (None, Some(path)) => resolve_note(db, path)?,
                    (None, None) => {
                        return Err(Error::InvalidInput(format!(
                            "{task_type} payload needs 'content' or 'path'"
                        )));
                    }
                };
                let sanitized = self.sanitizer.sanitize(content.as_bytes())?;
                Ok(json!({
                    "path": request.path,
                    "content": sanitized.text(),
                    "categories": request.categories,
                    "max_words": request.max_words,
                }))
            }
            TaskType::Synthesize => {
                if request.notes.is_empty() {
                    return Err(Error::InvalidInput(
                        "synthesize payload needs non-empty 'notes'".to_string(),
                    ));
                }
                let mut notes = Vec::with_capacity(request.notes.len());
                for path in &request.notes {
                    let content = resolve_note(db, path)?;
                    let sanitized = self.sanitizer.sanitize(content.as_bytes())?;
                    notes.push(json!({ "path": path, "content": sanitized.text() }));
                }
                Ok(json!({ "notes": notes }))
            }
        }
    }
}

fn resolve_note(db: &Database, path: &str) -> Result<String, Error> {
    db.note_content(path)?
        .ok_or_else(|| Error::InvalidInput(format!("note not indexed: {path}")))
}
