//! AI task queue rows.
//!
//! The table is the queue: `status` moves pending → processing → {done,
//! failed} and the claim is a single `UPDATE ... RETURNING` statement, so two
//! claimers can never receive the same row.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{Database, Error, Result, retry_transient, timestamp_now};

/// Kind of AI operation a task requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Classify,
    Summarize,
    Synthesize,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Classify, TaskType::Summarize, TaskType::Synthesize];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Classify => "classify",
            TaskType::Summarize => "summarize",
            TaskType::Synthesize => "synthesize",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "classify" => Some(TaskType::Classify),
            "summarize" => Some(TaskType::Summarize),
            "synthesize" => Some(TaskType::Synthesize),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// A row of `ai_task_queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: i64,
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

const TASK_COLUMNS: &str =
    "id, task_type, payload, status, created_at, claimed_at, finished_at, result, error, attempts";

struct RawTask {
    id: i64,
    task_type: String,
    payload: String,
    status: String,
    created_at: String,
    claimed_at: Option<String>,
    finished_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
    attempts: i64,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            payload: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            claimed_at: row.get(5)?,
            finished_at: row.get(6)?,
            result: row.get(7)?,
            error: row.get(8)?,
            attempts: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        let id = self.id;
        let task_type = TaskType::parse(&self.task_type)
            .ok_or_else(|| Error::InvalidData(format!("task {id} type '{}'", self.task_type)))?;
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| Error::InvalidData(format!("task {id} status '{}'", self.status)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| Error::InvalidData(format!("task {id} payload: {e}")))?;
        let result = self
            .result
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| Error::InvalidData(format!("task {id} result: {e}")))?;
        Ok(TaskRecord {
            id,
            task_type,
            payload,
            status,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            finished_at: self.finished_at,
            result,
            error: self.error,
            attempts: self.attempts,
        })
    }
}

/// Insert a pending task. Meant to run inside the enqueue transaction.
pub fn insert_task(
    conn: &Connection,
    task_type: TaskType,
    payload: &str,
    created_at: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO ai_task_queue (task_type, payload, status, created_at)
         VALUES (?1, ?2, 'pending', ?3)",
        params![task_type.as_str(), payload, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Atomically move the oldest pending task to `processing` and return it.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails or the claimed row is malformed.
    pub fn claim_next_task(&self) -> Result<Option<TaskRecord>> {
        let claimed_at = timestamp_now();
        let sql = format!(
            "UPDATE ai_task_queue
             SET status = 'processing', claimed_at = ?1, attempts = attempts + 1
             WHERE id = (
                SELECT id FROM ai_task_queue
                WHERE status = 'pending'
                ORDER BY created_at, id
                LIMIT 1
             ) AND status = 'pending'
             RETURNING {TASK_COLUMNS}"
        );
        let raw = retry_transient(|| {
            self.conn()
                .query_row(&sql, params![claimed_at], RawTask::from_row)
                .optional()
        })?;
        let task = raw.map(RawTask::into_record).transpose()?;

        if let Some(task) = &task {
            tracing::debug!(
                target: "notekeep.storage",
                op = "queue.claim",
                task_id = task.id,
                task_type = %task.task_type,
                attempts = task.attempts,
                "claimed task"
            );
        }
        Ok(task)
    }

    /// Mark a processing task done with its JSON result.
    ///
    /// Returns false if the task was not in `processing`.
    pub fn complete_task(&self, id: i64, result: &serde_json::Value) -> Result<bool> {
        let result = serde_json::to_string(result)
            .map_err(|e| Error::InvalidData(format!("task {id} result: {e}")))?;
        let finished_at = timestamp_now();
        let updated = retry_transient(|| {
            self.conn().execute(
                "UPDATE ai_task_queue
                 SET status = 'done', result = ?1, error = NULL, finished_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![result, finished_at, id],
            )
        })?;
        Ok(updated == 1)
    }

    /// Mark a processing task failed with an error message.
    ///
    /// Returns false if the task was not in `processing`.
    pub fn fail_task(&self, id: i64, error: &str) -> Result<bool> {
        let finished_at = timestamp_now();
        let updated = retry_transient(|| {
            self.conn().execute(
                "UPDATE ai_task_queue
                 SET status = 'failed', error = ?1, finished_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![error, finished_at, id],
            )
        })?;
        Ok(updated == 1)
    }

    /// Return `processing` tasks claimed before `cutoff` to `pending`.
    ///
    /// `cutoff` is an RFC 3339 timestamp in the same fixed format as
    /// `claimed_at`, so string comparison orders correctly.
    pub fn requeue_stale_tasks(&self, cutoff: &str) -> Result<usize> {
        let requeued = retry_transient(|| {
            self.conn().execute(
                "UPDATE ai_task_queue
                 SET status = 'pending', claimed_at = NULL
                 WHERE status = 'processing'
                   AND (claimed_at IS NULL OR claimed_at <= ?1)",
                params![cutoff],
            )
        })?;
        if requeued > 0 {
            tracing::info!(
                target: "notekeep.storage",
                op = "queue.requeue",
                requeued,
                "returned stale tasks to pending"
            );
        }
        Ok(requeued)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM ai_task_queue WHERE id = ?1"),
                params![id],
                RawTask::from_row,
            )
            .optional()?;
        raw.map(RawTask::into_record).transpose()
    }

    /// Most recent tasks first, optionally filtered by status.
    pub fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<TaskRecord>> {
        super::fts::validate_limit(limit)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM ai_task_queue
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id DESC
             LIMIT ?2"
        ))?;
        let rows: rusqlite::Result<Vec<RawTask>> = stmt
            .query_map(
                params![status.map(TaskStatus::as_str), limit as i64],
                RawTask::from_row,
            )?
            .collect();
        rows?.into_iter().map(RawTask::into_record).collect()
    }

    pub fn queue_counts(&self) -> Result<QueueCounts> {
        let mut stmt = self
            .conn()
            .prepare("SELECT status, COUNT(*) FROM ai_task_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as u64;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => counts.pending = count,
                Some(TaskStatus::Processing) => counts.processing = count,
                Some(TaskStatus::Done) => counts.done = count,
                Some(TaskStatus::Failed) => counts.failed = count,
                None => {
                    return Err(Error::InvalidData(format!("unknown task status '{status}'")));
                }
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::create_test_db;

    fn enqueue(db: &mut Database, created_at: &str) -> i64 {
        db.write(|tx| insert_task(tx, TaskType::Classify, r#"{"content":"x"}"#, created_at))
            .unwrap()
    }

    #[test]
    fn test_claim_takes_oldest_pending() {
        let mut db = create_test_db();
        let later = enqueue(&mut db, "2024-01-02T00:00:00.000Z");
        let earlier = enqueue(&mut db, "2024-01-01T00:00:00.000Z");

        let first = db.claim_next_task().unwrap().unwrap();
        assert_eq!(first.id, earlier);
        assert_eq!(first.status, TaskStatus::Processing);
        assert_eq!(first.attempts, 1);
        assert!(first.claimed_at.is_some());

        let second = db.claim_next_task().unwrap().unwrap();
        assert_eq!(second.id, later);
        assert!(db.claim_next_task().unwrap().is_none());
    }

    #[test]
    fn test_complete_and_fail_require_processing() {
        let mut db = create_test_db();
        let id = enqueue(&mut db, "2024-01-01T00:00:00.000Z");
        assert!(!db.complete_task(id, &serde_json::json!({})).unwrap());

        db.claim_next_task().unwrap();
        assert!(db.complete_task(id, &serde_json::json!({"category": "a"})).unwrap());
        assert!(!db.fail_task(id, "late").unwrap());

        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result, Some(serde_json::json!({"category": "a"})));
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_fail_records_error() {
        let mut db = create_test_db();
        let id = enqueue(&mut db, "2024-01-01T00:00:00.000Z");
        db.claim_next_task().unwrap();
        assert!(db.fail_task(id, "provider down").unwrap());

        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("provider down"));
    }

    #[test]
    fn test_requeue_stale_returns_to_pending() {
        let mut db = create_test_db();
        let id = enqueue(&mut db, "2024-01-01T00:00:00.000Z");
        db.claim_next_task().unwrap();

        assert_eq!(db.requeue_stale_tasks("2000-01-01T00:00:00.000Z").unwrap(), 0);
        assert_eq!(db.requeue_stale_tasks(&timestamp_now()).unwrap(), 1);

        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let again = db.claim_next_task().unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_queue_counts_and_listing() {
        let mut db = create_test_db();
        enqueue(&mut db, "2024-01-01T00:00:00.000Z");
        enqueue(&mut db, "2024-01-02T00:00:00.000Z");
        db.claim_next_task().unwrap();

        let counts = db.queue_counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.done, 0);

        let pending = db.list_tasks(Some(TaskStatus::Pending), 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(db.list_tasks(None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_claim_returns_each_task_once_across_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let mut a = Database::open(&path).unwrap();
        let b = Database::open(&path).unwrap();
        for _ in 0..5 {
            enqueue(&mut a, "2024-01-01T00:00:00.000Z");
        }

        let mut seen = Vec::new();
        loop {
            let ta = a.claim_next_task().unwrap();
            let tb = b.claim_next_task().unwrap();
            if ta.is_none() && tb.is_none() {
                break;
            }
            seen.extend(ta.map(|t| t.id));
            seen.extend(tb.map(|t| t.id));
        }
        let mut dedup = seen.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(seen.len(), 5);
        assert_eq!(dedup.len(), 5);
    }
}
