//! FTS5 full-text search with BM25 ranking, one partition at a time.

use rusqlite::params;

use super::{Database, Error, Result};
use crate::partition::Partition;

const MAX_SEARCH_LIMIT: usize = 10_000;

/// BM25 column weights, in table column order:
/// file_path, title, content, tags, mtime.
const BM25_WEIGHTS: &str = "0.0, 5.0, 1.0, 2.0, 0.0";

/// Validate a result limit is within acceptable bounds.
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidLimit(
            "Limit must be greater than 0".to_string(),
        ));
    }
    if limit > MAX_SEARCH_LIMIT {
        return Err(Error::InvalidLimit(format!(
            "Limit {} exceeds maximum allowed ({})",
            limit, MAX_SEARCH_LIMIT
        )));
    }
    Ok(())
}

/// A lexical match in one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsHit {
    pub file_path: String,
    pub title: String,
    /// Relevance, `-bm25`: higher is better.
    pub score: f64,
    pub snippet: String,
}

/// Quote each whitespace-separated word so user input is never parsed as
/// FTS5 syntax. Returns an empty string for blank input.
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Database {
    /// All lexical matches in `partition`, best first, ties ordered by path.
    ///
    /// Callers apply metadata filters and the final limit.
    ///
    /// # Errors
    ///
    /// Returns error if the FTS5 query fails.
    pub fn search_partition(&self, partition: Partition, query: &str) -> Result<Vec<FtsHit>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        let table = partition.fts_table();
        let sql = format!(
            "SELECT file_path, title, -bm25({table}, {BM25_WEIGHTS}) AS score,
                    snippet({table}, 2, '', '', '...', 16)
             FROM {table}
             WHERE {table} MATCH ?1
             ORDER BY score DESC, file_path ASC"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let hits: rusqlite::Result<Vec<FtsHit>> = stmt
            .query_map(params![escaped], |row| {
                Ok(FtsHit {
                    file_path: row.get(0)?,
                    title: row.get(1)?,
                    score: row.get(2)?,
                    snippet: row.get(3)?,
                })
            })?
            .collect();

        let hits = hits?;
        tracing::trace!(
            target: "notekeep.storage",
            op = "fts.search",
            partition = %partition,
            hits = hits.len(),
            "partition search complete"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::notes::{Maturity, NoteDocument, NoteRecord, upsert_note};
    use crate::storage::test_support::create_test_db;

    fn put(db: &mut Database, path: &str, title: &str, content: &str, partition: Partition) {
        let doc = NoteDocument {
            record: NoteRecord {
                file_path: path.to_string(),
                content_hash: "h".to_string(),
                title: title.to_string(),
                category_tag: None,
                tags: vec![],
                aliases: vec![],
                maturity: Maturity::Draft,
                modified_epoch: 0,
                archived: false,
                partition,
            },
            content: content.to_string(),
            chunks: vec![],
            links: vec![],
        };
        db.write(|tx| upsert_note(tx, &doc, "now")).unwrap();
    }

    #[test]
    fn test_search_partition_is_scoped() {
        let mut db = create_test_db();
        put(&mut db, "a.md", "A", "rust programming", Partition::Hot);
        put(&mut db, "b.md", "B", "rust errors", Partition::Cold);

        let hot = db.search_partition(Partition::Hot, "rust").unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].file_path, "a.md");

        let cold = db.search_partition(Partition::Cold, "rust").unwrap();
        assert_eq!(cold.len(), 1);
        assert_eq!(cold[0].file_path, "b.md");
    }

    #[test]
    fn test_title_outweighs_content() {
        let mut db = create_test_db();
        put(&mut db, "body.md", "Other", "python notes here", Partition::Hot);
        put(&mut db, "title.md", "Python", "notes here", Partition::Hot);

        let hits = db.search_partition(Partition::Hot, "python").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "title.md");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let mut db = create_test_db();
        put(&mut db, "a.md", "A", "content", Partition::Hot);
        assert!(db.search_partition(Partition::Hot, "   ").unwrap().is_empty());
    }

    #[test]
    fn test_special_characters_do_not_error() {
        let mut db = create_test_db();
        put(&mut db, "a.md", "A", "test with \"quotes\"", Partition::Hot);
        put(&mut db, "b.md", "B", "NEAR(a b) OR -x", Partition::Hot);

        assert_eq!(
            db.search_partition(Partition::Hot, "with \"quotes\"")
                .unwrap()
                .len(),
            1
        );
        assert!(db.search_partition(Partition::Hot, "NEAR( OR").is_ok());
    }

    #[test]
    fn test_limit_validation() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(10_001).is_err());
        assert!(validate_limit(10).is_ok());
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("a  b"), "\"a\" \"b\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(escape_fts_query(""), "");
    }
}
