//! Versioned schema migrations.
//!
//! Each migration is a list of idempotent steps applied in its own
//! transaction. The applied level lives in a single-row `schema_version`
//! table and is bumped after every step list commits.

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::{Error, Result};

pub const SCHEMA_VERSION: i64 = 2;

enum Step {
    Sql(&'static str),
    /// `ALTER TABLE ... ADD COLUMN`, skipped when the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

struct Migration {
    version: i64,
    steps: &'static [Step],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        steps: &[
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS notes_index (
                    file_path TEXT PRIMARY KEY,
                    content_hash TEXT NOT NULL,
                    title TEXT NOT NULL,
                    category_tag TEXT,
                    tags TEXT NOT NULL DEFAULT '[]',
                    aliases TEXT NOT NULL DEFAULT '[]',
                    maturity TEXT NOT NULL DEFAULT 'draft',
                    modified_epoch INTEGER NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0,
                    partition TEXT NOT NULL CHECK (partition IN ('hot', 'cold')),
                    indexed_at TEXT NOT NULL
                )",
            ),
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_notes_index_partition
                    ON notes_index(partition, modified_epoch)",
            ),
            Step::Sql(
                "CREATE VIRTUAL TABLE IF NOT EXISTS hot_fts USING fts5(
                    file_path UNINDEXED,
                    title,
                    content,
                    tags,
                    mtime UNINDEXED,
                    tokenize='porter unicode61'
                )",
            ),
            Step::Sql(
                "CREATE VIRTUAL TABLE IF NOT EXISTS cold_fts USING fts5(
                    file_path UNINDEXED,
                    title,
                    content,
                    tags,
                    mtime UNINDEXED,
                    tokenize='porter unicode61'
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS hot_embeddings (
                    file_path TEXT NOT NULL,
                    chunk_id INTEGER NOT NULL,
                    chunk_text TEXT NOT NULL,
                    vector BLOB NOT NULL,
                    mtime INTEGER NOT NULL,
                    PRIMARY KEY (file_path, chunk_id)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS cold_embeddings (
                    file_path TEXT NOT NULL,
                    chunk_id INTEGER NOT NULL,
                    chunk_text TEXT NOT NULL,
                    vector BLOB NOT NULL,
                    mtime INTEGER NOT NULL,
                    PRIMARY KEY (file_path, chunk_id)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS note_links (
                    source_path TEXT NOT NULL,
                    target_ref TEXT NOT NULL,
                    PRIMARY KEY (source_path, target_ref)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS ai_task_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_type TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'processing', 'done', 'failed')),
                    created_at TEXT NOT NULL
                )",
            ),
        ],
    },
    Migration {
        version: 2,
        steps: &[
            Step::AddColumn {
                table: "ai_task_queue",
                column: "claimed_at",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "ai_task_queue",
                column: "finished_at",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "ai_task_queue",
                column: "result",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "ai_task_queue",
                column: "error",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "ai_task_queue",
                column: "attempts",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_ai_task_queue_status
                    ON ai_task_queue(status, created_at, id)",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS quota_usage (
                    identity TEXT NOT NULL,
                    day TEXT NOT NULL,
                    count INTEGER NOT NULL,
                    PRIMARY KEY (identity, day)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS sanitization_audit (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    signature TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    user_hash TEXT NOT NULL,
                    task_id INTEGER
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS engine_settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )",
            ),
        ],
    },
];

/// Bring the schema up to [`SCHEMA_VERSION`]. Returns the applied version.
///
/// # Errors
///
/// Returns `Error::Migration` when the stored version is negative or newer
/// than this build understands, or when a step fails.
pub fn migrate(conn: &mut Connection) -> Result<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let mut version = current_version(conn)?.unwrap_or(0);
    if version < 0 || version > SCHEMA_VERSION {
        return Err(Error::Migration(format!(
            "no migration path from stored schema version {version} to {SCHEMA_VERSION}"
        )));
    }

    for migration in MIGRATIONS {
        if migration.version <= version {
            continue;
        }

        tracing::debug!(
            target: "notekeep.storage",
            from_version = version,
            to_version = migration.version,
            "applying schema migration"
        );

        let tx = conn.transaction()?;
        for step in migration.steps {
            apply_step(&tx, step).map_err(|e| {
                Error::Migration(format!("step for version {} failed: {e}", migration.version))
            })?;
        }
        tx.execute(
            "INSERT INTO schema_version (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            params![migration.version],
        )?;
        tx.commit()?;
        version = migration.version;
    }

    Ok(version)
}

/// Stored schema version, `None` on a fresh database.
pub fn current_version(conn: &Connection) -> Result<Option<i64>> {
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version)
}

fn apply_step(tx: &Transaction<'_>, step: &Step) -> rusqlite::Result<()> {
    match step {
        Step::Sql(sql) => {
            tx.execute_batch(sql)?;
        }
        Step::AddColumn {
            table,
            column,
            definition,
        } => {
            let exists: bool = tx.query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |row| row.get::<_, i64>(0).map(|count| count > 0),
            )?;
            if !exists {
                tx.execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} {definition}"
                ))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use tempfile::TempDir;

    fn open_raw() -> (Connection, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.db");
        std::mem::forget(dir);
        (Connection::open(&path).unwrap(), path)
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let (mut conn, _) = open_raw();
        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (mut conn, _) = open_raw();
        migrate(&mut conn).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_upgrade_from_v1_adds_task_columns() {
        let (mut conn, _) = open_raw();
        conn.execute_batch(
            "CREATE TABLE schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL);",
        )
        .unwrap();
        {
            let tx = conn.transaction().unwrap();
            for step in MIGRATIONS[0].steps {
                apply_step(&tx, step).unwrap();
            }
            tx.execute("INSERT INTO schema_version (id, version) VALUES (1, 1)", [])
                .unwrap();
            tx.commit().unwrap();
        }
        conn.execute(
            "INSERT INTO ai_task_queue (task_type, payload, created_at) VALUES ('classify', '{}', 'x')",
            [],
        )
        .unwrap();

        assert_eq!(migrate(&mut conn).unwrap(), 2);

        let attempts: i64 = conn
            .query_row("SELECT attempts FROM ai_task_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attempts, 0);
    }

    #[test]
    fn test_newer_stored_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute("UPDATE schema_version SET version = 99", [])
                .unwrap();
        }
        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }

    #[test]
    fn test_negative_stored_version_is_rejected() {
        let (mut conn, _) = open_raw();
        migrate(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET version = -1", [])
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(Error::Migration(_))));
    }
}
