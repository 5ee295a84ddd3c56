//! SQLite backend for notekeep.
//!
//! This module provides:
//! - `Database`: connection lifecycle, pragmas, checkpoint and close
//! - `schema`: versioned, idempotent migrations
//! - `notes`: note records, partitioned FTS entries, chunks and links
//! - `fts`: FTS5 BM25 search per partition
//! - `embedding`: BLOB conversion, cosine similarity, chunk scoring
//! - `queue`: the AI task queue rows and the atomic claim
//! - `quota`: daily counters, sanitization audit and engine settings

pub mod embedding;
pub mod fts;
pub mod notes;
pub mod queue;
pub mod quota;
pub mod schema;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, Transaction};

pub use self::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// Pages between automatic WAL checkpoints. Fixed rather than tuned per host.
const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
const TRANSIENT_RETRY_ATTEMPTS: u32 = 5;
const TRANSIENT_RETRY_BASE_MS: u64 = 25;

/// Error types for SQLite operations.
#[derive(Debug)]
pub enum Error {
    Sqlite(String),
    Migration(String),
    InvalidBlobSize { expected: usize, actual: usize },
    MismatchedDimensions { expected: usize, actual: usize },
    EmptyVector,
    InvalidEmbedding(String),
    InvalidLimit(String),
    InvalidData(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Sqlite(msg) => write!(f, "Database error: {}", msg),
            Error::Migration(msg) => write!(f, "Migration error: {}", msg),
            Error::InvalidBlobSize { expected, actual } => {
                write!(
                    f,
                    "Invalid BLOB size: expected {} bytes, got {} bytes",
                    expected, actual
                )
            }
            Error::MismatchedDimensions { expected, actual } => {
                write!(
                    f,
                    "Mismatched dimensions: expected {} dimensions, got {} dimensions",
                    expected, actual
                )
            }
            Error::EmptyVector => write!(f, "Cannot compute similarity with empty vector"),
            Error::InvalidEmbedding(msg) => write!(f, "Invalid embedding: {}", msg),
            Error::InvalidLimit(msg) => write!(f, "Invalid limit: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid stored data: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Current UTC time as a fixed-width RFC 3339 string.
///
/// Millisecond precision with a `Z` suffix keeps lexicographic order equal to
/// chronological order, which the queue's staleness query relies on.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether a SQLite error is lock contention worth retrying.
fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Run `op`, retrying lock contention with bounded exponential backoff.
pub(crate) fn retry_transient<T>(
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if is_transient(&err) && attempt + 1 < TRANSIENT_RETRY_ATTEMPTS => {
                let delay = TRANSIENT_RETRY_BASE_MS << attempt;
                tracing::debug!(
                    target: "notekeep.storage",
                    attempt,
                    delay_ms = delay,
                    error = %err,
                    "transient lock contention, retrying"
                );
                thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// SQLite database backend for notekeep.
///
/// Opened once per process. Writers go through [`Database::write`], which
/// wraps the work in a transaction and retries transient lock errors.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create a SQLite database at the given path and migrate it.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened, pragmas fail, or no
    /// migration path exists for the stored schema version.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!(
            target: "notekeep.storage",
            path = %path.display(),
            "opening database"
        );

        let conn = Connection::open(path)?;
        let mut db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.apply_pragmas()?;
        let version = db.migrate()?;

        tracing::debug!(
            target: "notekeep.storage",
            schema_version = version,
            "database ready"
        );
        Ok(db)
    }

    fn apply_pragmas(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        let pages: i64 = self.conn.query_row(
            &format!("PRAGMA wal_autocheckpoint = {WAL_AUTOCHECKPOINT_PAGES}"),
            [],
            |row| row.get(0),
        )?;

        tracing::trace!(
            target: "notekeep.storage",
            journal_mode = %mode,
            wal_autocheckpoint = pages,
            "pragmas applied"
        );
        Ok(())
    }

    /// Apply any missing migrations. Returns the resulting schema version.
    ///
    /// # Errors
    ///
    /// Returns `Error::Migration` if the stored version has no path to the
    /// current version.
    pub fn migrate(&mut self) -> Result<i64> {
        schema::migrate(&mut self.conn)
    }

    /// Flush the write-ahead log into the main database file.
    ///
    /// # Errors
    ///
    /// Returns error if the checkpoint statement fails.
    pub fn checkpoint(&self) -> Result<()> {
        let (busy, log_frames, checkpointed): (i64, i64, i64) = retry_transient(|| {
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
        })?;

        tracing::debug!(
            target: "notekeep.storage",
            op = "checkpoint",
            busy,
            log_frames,
            checkpointed,
            "wal checkpoint completed"
        );
        Ok(())
    }

    /// Checkpoint and close the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the checkpoint fails or SQLite refuses to close.
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        let path = self.path.clone();
        self.conn.close().map_err(|(_, err)| Error::from(err))?;
        tracing::debug!(
            target: "notekeep.storage",
            path = %path.display(),
            "database closed"
        );
        Ok(())
    }

    /// Run `work` inside a transaction, retrying transient lock errors.
    ///
    /// The closure may run more than once when the database is busy, so it
    /// must not have side effects outside the transaction.
    pub fn write<T>(
        &mut self,
        mut work: impl FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = &mut self.conn;
        let value = retry_transient(|| {
            let tx = conn.transaction()?;
            let value = work(&tx)?;
            tx.commit()?;
            Ok(value)
        })?;
        Ok(value)
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get internal connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
