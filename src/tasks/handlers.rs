//! Per-type task execution.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Value, json};

use super::provider::AiProvider;
use crate::errors::Error;
use crate::sanitize::{Pipeline, SanitizedPayload};
use crate::storage::queue::{TaskRecord, TaskType};
use crate::storage::quota::AuditRecord;
use crate::storage::{Database, timestamp_now};

/// Default summary length when the payload does not set `max_words`.
pub const DEFAULT_SUMMARY_WORDS: usize = 80;

/// Where audit rows go.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), Error>;
}

impl AuditSink for Mutex<Database> {
    fn record(&self, record: &AuditRecord) -> Result<(), Error> {
        let db = self
            .lock()
            .map_err(|_| Error::Task("database lock poisoned".to_string()))?;
        db.record_audit(record)?;
        Ok(())
    }
}

/// Everything a handler may touch while it runs.
pub struct TaskContext<'a> {
    pub sanitizer: &'a Pipeline,
    pub provider: &'a dyn AiProvider,
    pub audit: &'a dyn AuditSink,
    /// Hashed identity stored on audit rows.
    pub user_hash: &'a str,
}

impl TaskContext<'_> {
    /// Sanitize `text` and persist its audit row before anything is sent.
    pub fn sanitize(&self, task_id: i64, text: &str) -> Result<SanitizedPayload, Error> {
        let payload = self.sanitizer.sanitize(text.as_bytes())?;
        self.audit.record(&AuditRecord {
            signature: payload.signature().to_string(),
            created_at: timestamp_now(),
            user_hash: self.user_hash.to_string(),
            task_id: Some(task_id),
        })?;
        Ok(payload)
    }
}

pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Run the task and return its JSON result.
    fn handle(&self, task: &TaskRecord, ctx: &TaskContext<'_>) -> Result<Value, Error>;
}

fn content_field<'a>(task: &'a TaskRecord, field: &str) -> Result<&'a str, Error> {
    task.payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Task(format!("task {} payload has no '{field}'", task.id)))
}

pub struct ClassifyHandler;

impl TaskHandler for ClassifyHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Classify
    }

    fn handle(&self, task: &TaskRecord, ctx: &TaskContext<'_>) -> Result<Value, Error> {
        let categories: Vec<String> = task
            .payload
            .get("categories")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let payload = ctx.sanitize(task.id, content_field(task, "content")?)?;
        let classification = ctx.provider.classify(&payload, &categories)?;
        Ok(json!({
            "category": classification.category,
            "confidence": classification.confidence,
            "provider": ctx.provider.name(),
            "signature": payload.signature(),
        }))
    }
}

pub struct SummarizeHandler;

impl TaskHandler for SummarizeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Summarize
    }

    fn handle(&self, task: &TaskRecord, ctx: &TaskContext<'_>) -> Result<Value, Error> {
        let max_words = task
            .payload
            .get("max_words")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SUMMARY_WORDS);

        let payload = ctx.sanitize(task.id, content_field(task, "content")?)?;
        let summary = ctx.provider.summarize(&payload, max_words)?;
        Ok(json!({
            "summary": summary,
            "provider": ctx.provider.name(),
            "signature": payload.signature(),
        }))
    }
}

pub struct SynthesizeHandler;

impl TaskHandler for SynthesizeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Synthesize
    }

    fn handle(&self, task: &TaskRecord, ctx: &TaskContext<'_>) -> Result<Value, Error> {
        let notes = task
            .payload
            .get("notes")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Task(format!("task {} payload has no 'notes'", task.id)))?;

        let mut sources = Vec::with_capacity(notes.len());
        let mut payloads = Vec::with_capacity(notes.len());
        for note in notes {
            let content = note
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Task(format!("task {} has a note without content", task.id)))?;
            if let Some(path) = note.get("path").and_then(Value::as_str) {
                sources.push(path.to_string());
            }
            payloads.push(ctx.sanitize(task.id, content)?);
        }

        let synthesis = ctx.provider.synthesize(&payloads)?;
        let signatures: Vec<&str> = payloads.iter().map(SanitizedPayload::signature).collect();
        Ok(json!({
            "synthesis": synthesis,
            "sources": sources,
            "provider": ctx.provider.name(),
            "signatures": signatures,
        }))
    }
}

/// Handlers keyed by task type.
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Classify, summarize and synthesize.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(ClassifyHandler));
        registry.register(Box::new(SummarizeHandler));
        registry.register(Box::new(SynthesizeHandler));
        registry
    }

    /// Replaces any handler already registered for the same type.
    pub fn register(&mut self, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<&dyn TaskHandler> {
        self.handlers.get(&task_type).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::SanitizerConfig;
    use crate::storage::queue::TaskStatus;
    use crate::storage::test_support::create_test_db;
    use crate::tasks::provider::LocalProvider;

    fn task(id: i64, task_type: TaskType, payload: Value) -> TaskRecord {
        TaskRecord {
            id,
            task_type,
            payload,
            status: TaskStatus::Processing,
            created_at: timestamp_now(),
            claimed_at: None,
            finished_at: None,
            result: None,
            error: None,
            attempts: 1,
        }
    }

    fn run(t: &TaskRecord, audit: &Mutex<Database>) -> Result<Value, Error> {
        let sanitizer = Pipeline::new(SanitizerConfig::new(b"k".to_vec(), 2000)).unwrap();
        let ctx = TaskContext {
            sanitizer: &sanitizer,
            provider: &LocalProvider,
            audit,
            user_hash: "h",
        };
        HandlerRegistry::with_defaults()
            .get(t.task_type)
            .unwrap()
            .handle(t, &ctx)
    }

    #[test]
    fn test_classify_records_audit() {
        let db = Mutex::new(create_test_db());
        let t = task(
            7,
            TaskType::Classify,
            json!({"content": "rust borrow checker notes", "categories": ["Cooking", "Rust"]}),
        );
        let result = run(&t, &db).unwrap();
        assert_eq!(result["category"], "Rust");

        let audits = db.lock().unwrap().audit_records(Some(7)).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].signature, result["signature"]);
        assert_eq!(audits[0].user_hash, "h");
    }

    #[test]
    fn test_summarize_respects_max_words() {
        let db = Mutex::new(create_test_db());
        let t = task(
            1,
            TaskType::Summarize,
            json!({"content": "One two three. Four five six.", "max_words": 3}),
        );
        assert_eq!(run(&t, &db).unwrap()["summary"], "One two three.");
    }

    #[test]
    fn test_synthesize_audits_each_note() {
        let db = Mutex::new(create_test_db());
        let t = task(
            2,
            TaskType::Synthesize,
            json!({"notes": [
                {"path": "a.md", "content": "Alpha."},
                {"path": "b.md", "content": "Beta."}
            ]}),
        );
        let result = run(&t, &db).unwrap();
        assert_eq!(result["sources"], json!(["a.md", "b.md"]));
        assert_eq!(db.lock().unwrap().audit_records(Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_content_is_task_error() {
        let db = Mutex::new(create_test_db());
        let t = task(3, TaskType::Summarize, json!({}));
        assert!(matches!(run(&t, &db), Err(Error::Task(_))));
        assert!(db.lock().unwrap().audit_records(None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_content_fails_closed_before_provider() {
        let db = Mutex::new(create_test_db());
        let t = task(4, TaskType::Summarize, json!({"content": "a\u{0000}b"}));
        assert!(matches!(run(&t, &db), Err(Error::Sanitization { .. })));
        assert!(db.lock().unwrap().audit_records(None).unwrap().is_empty());
    }
}
