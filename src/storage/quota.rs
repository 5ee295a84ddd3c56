//! Daily quota counters, the sanitization audit trail and engine settings.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::{Database, Result, retry_transient};

/// Count one use for `identity` on `day` if it stays within `max`.
///
/// Returns the new count, or `None` when the quota is already spent. The
/// check and the increment are one statement, so concurrent callers cannot
/// both take the last slot.
pub fn admit_quota(
    conn: &Connection,
    identity: &str,
    day: &str,
    max: u32,
) -> rusqlite::Result<Option<u32>> {
    if max == 0 {
        return Ok(None);
    }
    conn.query_row(
        "INSERT INTO quota_usage (identity, day, count) VALUES (?1, ?2, 1)
         ON CONFLICT(identity, day) DO UPDATE SET count = count + 1
         WHERE count < ?3
         RETURNING count",
        params![identity, day, max],
        |row| row.get(0),
    )
    .optional()
}

/// One audit row: never content, only its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub signature: String,
    pub created_at: String,
    pub user_hash: String,
    pub task_id: Option<i64>,
}

pub fn insert_audit(conn: &Connection, record: &AuditRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sanitization_audit (signature, created_at, user_hash, task_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.signature,
            record.created_at,
            record.user_hash,
            record.task_id
        ],
    )?;
    Ok(())
}

impl Database {
    /// Tasks already admitted for `identity` on `day`.
    pub fn quota_used(&self, identity: &str, day: &str) -> Result<u32> {
        let used = self
            .conn()
            .query_row(
                "SELECT count FROM quota_usage WHERE identity = ?1 AND day = ?2",
                params![identity, day],
                |row| row.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(0))
    }

    pub fn record_audit(&self, record: &AuditRecord) -> Result<()> {
        retry_transient(|| insert_audit(self.conn(), record))?;
        Ok(())
    }

    pub fn audit_records(&self, task_id: Option<i64>) -> Result<Vec<AuditRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT signature, created_at, user_hash, task_id FROM sanitization_audit
             WHERE ?1 IS NULL OR task_id = ?1
             ORDER BY id",
        )?;
        let rows: rusqlite::Result<Vec<AuditRecord>> = stmt
            .query_map(params![task_id], |row| {
                Ok(AuditRecord {
                    signature: row.get(0)?,
                    created_at: row.get(1)?,
                    user_hash: row.get(2)?,
                    task_id: row.get(3)?,
                })
            })?
            .collect();
        Ok(rows?)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM engine_settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key` unless a value already exists; returns the
    /// value that ends up stored.
    pub fn get_or_insert_setting(&self, key: &str, value: &str) -> Result<String> {
        retry_transient(|| {
            self.conn().execute(
                "INSERT OR IGNORE INTO engine_settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
        })?;
        let stored = self.conn().query_row(
            "SELECT value FROM engine_settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        )?;
        Ok(stored)
    }
}
