//! Note records and their partitioned projections.
//!
//! Write helpers take a plain `&Connection` so the indexer can call them on a
//! transaction (which derefs to a connection) and batch many notes per commit.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::embedding::vec_to_blob;
use super::{Database, Error, Result};
use crate::partition::Partition;

/// Editorial maturity of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Maturity {
    #[default]
    Draft,
    Review,
    Stable,
    Deprecated,
}

impl Maturity {
    pub fn as_str(self) -> &'static str {
        match self {
            Maturity::Draft => "draft",
            Maturity::Review => "review",
            Maturity::Stable => "stable",
            Maturity::Deprecated => "deprecated",
        }
    }

    /// Parse a maturity name, case-insensitive. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Maturity::Draft),
            "review" => Some(Maturity::Review),
            "stable" => Some(Maturity::Stable),
            "deprecated" => Some(Maturity::Deprecated),
            _ => None,
        }
    }
}

/// Indexed metadata for one note file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Path relative to the notes root, `/`-separated.
    pub file_path: String,
    pub content_hash: String,
    pub title: String,
    pub category_tag: Option<String>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub maturity: Maturity,
    pub modified_epoch: i64,
    pub archived: bool,
    pub partition: Partition,
}

/// One embedded chunk ready to store.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub text: String,
    pub vector: Vec<f32>,
}

/// Everything the indexer writes for a changed note.
#[derive(Debug, Clone)]
pub struct NoteDocument {
    pub record: NoteRecord,
    pub content: String,
    pub chunks: Vec<ChunkRow>,
    pub links: Vec<String>,
}

const NOTE_COLUMNS: &str = "file_path, content_hash, title, category_tag, tags, aliases, \
                            maturity, modified_epoch, archived, partition";

struct RawNote {
    file_path: String,
    content_hash: String,
    title: String,
    category_tag: Option<String>,
    tags: String,
    aliases: String,
    maturity: String,
    modified_epoch: i64,
    archived: bool,
    partition: String,
}

impl RawNote {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_path: row.get(0)?,
            content_hash: row.get(1)?,
            title: row.get(2)?,
            category_tag: row.get(3)?,
            tags: row.get(4)?,
            aliases: row.get(5)?,
            maturity: row.get(6)?,
            modified_epoch: row.get(7)?,
            archived: row.get(8)?,
            partition: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<NoteRecord> {
        let tags: Vec<String> = serde_json::from_str(&self.tags)
            .map_err(|e| Error::InvalidData(format!("tags of {}: {e}", self.file_path)))?;
        let aliases: Vec<String> = serde_json::from_str(&self.aliases)
            .map_err(|e| Error::InvalidData(format!("aliases of {}: {e}", self.file_path)))?;
        let partition = Partition::parse(&self.partition).ok_or_else(|| {
            Error::InvalidData(format!(
                "partition '{}' of {}",
                self.partition, self.file_path
            ))
        })?;
        Ok(NoteRecord {
            file_path: self.file_path,
            content_hash: self.content_hash,
            title: self.title,
            category_tag: self.category_tag,
            tags,
            aliases,
            maturity: Maturity::parse(&self.maturity).unwrap_or_default(),
            modified_epoch: self.modified_epoch,
            archived: self.archived,
            partition,
        })
    }
}

/// Insert or replace a note and all of its projections.
///
/// The FTS entry, chunks and links are removed from both partitions first and
/// written to the record's partition, so a note never appears in both.
pub fn upsert_note(conn: &Connection, doc: &NoteDocument, indexed_at: &str) -> rusqlite::Result<()> {
    let record = &doc.record;
    remove_projections(conn, &record.file_path)?;

    let tags = serde_json::to_string(&record.tags)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let aliases = serde_json::to_string(&record.aliases)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO notes_index (file_path, content_hash, title, category_tag, tags, aliases,
                                  maturity, modified_epoch, archived, partition, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(file_path) DO UPDATE SET
            content_hash = excluded.content_hash,
            title = excluded.title,
            category_tag = excluded.category_tag,
            tags = excluded.tags,
            aliases = excluded.aliases,
            maturity = excluded.maturity,
            modified_epoch = excluded.modified_epoch,
            archived = excluded.archived,
            partition = excluded.partition,
            indexed_at = excluded.indexed_at",
        params![
            record.file_path,
            record.content_hash,
            record.title,
            record.category_tag,
            tags,
            aliases,
            record.maturity.as_str(),
            record.modified_epoch,
            record.archived,
            record.partition.as_str(),
            indexed_at,
        ],
    )?;

    conn.execute(
        &format!(
            "INSERT INTO {} (file_path, title, content, tags, mtime) VALUES (?1, ?2, ?3, ?4, ?5)",
            record.partition.fts_table()
        ),
        params![
            record.file_path,
            record.title,
            doc.content,
            record.tags.join(" "),
            record.modified_epoch,
        ],
    )?;

    let mut chunk_stmt = conn.prepare(&format!(
        "INSERT INTO {} (file_path, chunk_id, chunk_text, vector, mtime) VALUES (?1, ?2, ?3, ?4, ?5)",
        record.partition.embeddings_table()
    ))?;
    for (chunk_id, chunk) in doc.chunks.iter().enumerate() {
        let blob = vec_to_blob(&chunk.vector)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        chunk_stmt.execute(params![
            record.file_path,
            chunk_id as i64,
            chunk.text,
            blob,
            record.modified_epoch,
        ])?;
    }

    let mut link_stmt = conn.prepare(
        "INSERT OR IGNORE INTO note_links (source_path, target_ref) VALUES (?1, ?2)",
    )?;
    for target in &doc.links {
        link_stmt.execute(params![record.file_path, target])?;
    }

    Ok(())
}

fn remove_projections(conn: &Connection, file_path: &str) -> rusqlite::Result<()> {
    for partition in Partition::ALL {
        conn.execute(
            &format!("DELETE FROM {} WHERE file_path = ?1", partition.fts_table()),
            [file_path],
        )?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE file_path = ?1",
                partition.embeddings_table()
            ),
            [file_path],
        )?;
    }
    conn.execute("DELETE FROM note_links WHERE source_path = ?1", [file_path])?;
    Ok(())
}

/// Remove a note from every table.
pub fn delete_note(conn: &Connection, file_path: &str) -> rusqlite::Result<()> {
    remove_projections(conn, file_path)?;
    conn.execute("DELETE FROM notes_index WHERE file_path = ?1", [file_path])?;
    Ok(())
}

/// Move a note's FTS entry and chunks to `target` without re-reading the file.
///
/// Returns false when the note is unknown or already in `target`.
pub fn move_partition(conn: &Connection, file_path: &str, target: Partition) -> rusqlite::Result<bool> {
    let source = target.other();
    let updated = conn.execute(
        "UPDATE notes_index SET partition = ?1 WHERE file_path = ?2 AND partition = ?3",
        params![target.as_str(), file_path, source.as_str()],
    )?;
    if updated == 0 {
        return Ok(false);
    }

    conn.execute(
        &format!(
            "INSERT INTO {dst} (file_path, title, content, tags, mtime)
             SELECT file_path, title, content, tags, mtime FROM {src} WHERE file_path = ?1",
            dst = target.fts_table(),
            src = source.fts_table()
        ),
        [file_path],
    )?;
    conn.execute(
        &format!("DELETE FROM {} WHERE file_path = ?1", source.fts_table()),
        [file_path],
    )?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {dst} (file_path, chunk_id, chunk_text, vector, mtime)
             SELECT file_path, chunk_id, chunk_text, vector, mtime FROM {src} WHERE file_path = ?1",
            dst = target.embeddings_table(),
            src = source.embeddings_table()
        ),
        [file_path],
    )?;
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE file_path = ?1",
            source.embeddings_table()
        ),
        [file_path],
    )?;
    Ok(true)
}

/// Drop every index table's rows. The task queue, quota and audit survive.
pub fn clear_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DELETE FROM notes_index;
         DELETE FROM hot_fts;
         DELETE FROM cold_fts;
         DELETE FROM hot_embeddings;
         DELETE FROM cold_embeddings;
         DELETE FROM note_links;",
    )
}

impl Database {
    /// Look up one note by relative path.
    pub fn get_note(&self, file_path: &str) -> Result<Option<NoteRecord>> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes_index WHERE file_path = ?1"),
                [file_path],
                RawNote::from_row,
            )
            .optional()?;
        raw.map(RawNote::into_record).transpose()
    }

    /// All indexed notes ordered by path.
    pub fn list_notes(&self) -> Result<Vec<NoteRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes_index ORDER BY file_path"
        ))?;
        let rows: rusqlite::Result<Vec<RawNote>> =
            stmt.query_map([], RawNote::from_row)?.collect();
        rows?.into_iter().map(RawNote::into_record).collect()
    }

    /// Stored `(modified_epoch, content_hash)` keyed by path, for change detection.
    pub fn note_fingerprints(&self) -> Result<HashMap<String, (i64, String)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT file_path, modified_epoch, content_hash FROM notes_index")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, fingerprint) = row?;
            map.insert(path, fingerprint);
        }
        Ok(map)
    }

    /// Paths in the hot partition modified before `cutoff_epoch`.
    pub fn hot_notes_older_than(&self, cutoff_epoch: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT file_path FROM notes_index
             WHERE partition = 'hot' AND modified_epoch < ?1
             ORDER BY file_path",
        )?;
        let rows: rusqlite::Result<Vec<String>> =
            stmt.query_map([cutoff_epoch], |row| row.get(0))?.collect();
        Ok(rows?)
    }

    /// Indexed content of a note, from whichever partition holds it.
    pub fn note_content(&self, file_path: &str) -> Result<Option<String>> {
        for partition in Partition::ALL {
            let content: Option<String> = self
                .conn()
                .query_row(
                    &format!(
                        "SELECT content FROM {} WHERE file_path = ?1",
                        partition.fts_table()
                    ),
                    [file_path],
                    |row| row.get(0),
                )
                .optional()?;
            if content.is_some() {
                return Ok(content);
            }
        }
        Ok(None)
    }

    /// All stored `(source_path, target_ref)` pairs ordered by source.
    pub fn list_links(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn().prepare(
            "SELECT source_path, target_ref FROM note_links ORDER BY source_path, target_ref",
        )?;
        let rows: rusqlite::Result<Vec<(String, String)>> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect();
        Ok(rows?)
    }

    /// Number of FTS entries in a partition.
    pub fn partition_count(&self, partition: Partition) -> Result<i64> {
        let count = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {}", partition.fts_table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of stored chunks for a note in a partition.
    pub fn chunk_count(&self, file_path: &str, partition: Partition) -> Result<i64> {
        let count = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE file_path = ?1",
                partition.embeddings_table()
            ),
            [file_path],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
