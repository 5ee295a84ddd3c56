//! Hybrid search over the hot and cold partitions.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::errors::Error;
use crate::fusion::{FusedHit, FusionConfig, fuse_partition};
use crate::indexer::Indexer;
use crate::partition::Partition;
use crate::storage::Database;
use crate::storage::fts::validate_limit;
use crate::storage::notes::{Maturity, NoteRecord};

/// Metadata constraints. Empty fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Category prefix, e.g. `10` matches `10.01` and `10-19`.
    pub category: Option<String>,
    /// Every tag must be present (case-insensitive).
    pub tags: Vec<String>,
    /// Any of these maturities.
    pub maturity: Vec<Maturity>,
}

impl SearchFilters {
    fn matches(&self, note: &NoteRecord) -> bool {
        if let Some(prefix) = &self.category {
            let ok = note
                .category_tag
                .as_deref()
                .is_some_and(|c| c.starts_with(prefix.as_str()));
            if !ok {
                return false;
            }
        }
        if !self
            .tags
            .iter()
            .all(|want| note.tags.iter().any(|t| t.eq_ignore_ascii_case(want)))
        {
            return false;
        }
        self.maturity.is_empty() || self.maturity.contains(&note.maturity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    pub filters: SearchFilters,
    pub include_archive: bool,
    /// Rebuild the whole index before querying.
    pub reindex: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filters: SearchFilters::default(),
            include_archive: false,
            reindex: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub file_path: String,
    pub title: String,
    pub partition: Partition,
    pub score: f64,
    pub lexical_score: Option<f64>,
    pub semantic_score: Option<f64>,
    pub snippet: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub maturity: Maturity,
}

/// Ordered results: every hot result precedes every cold one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedResults {
    pub results: Vec<SearchResult>,
    /// The latency budget ran out and later stages were skipped.
    pub partial: bool,
    /// Whether the semantic layer contributed.
    pub semantic: bool,
    pub elapsed_ms: u64,
}

/// Stateless hybrid search over a [`Database`].
#[derive(Debug, Clone)]
pub struct SearchService {
    budget: Duration,
    fusion: FusionConfig,
}

impl SearchService {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            fusion: FusionConfig::default(),
        }
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    /// Search both partitions, hot strictly before cold.
    ///
    /// The semantic layer is best-effort: without an embedder, or if it
    /// fails, results are lexical-only.
    ///
    /// # Errors
    ///
    /// - `Error::Storage` for an out-of-range limit or a failing query.
    /// - `Error::SearchTimeout` if the budget runs out before any result exists.
    pub fn search(
        &self,
        db: &mut Database,
        indexer: &Indexer,
        mut embedder: Option<&mut (dyn Embedder + '_)>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<RankedResults, Error> {
        validate_limit(options.limit)?;

        if options.reindex {
            indexer.reindex(db, embedder.as_deref_mut())?;
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(RankedResults::default());
        }

        let start = Instant::now();
        let mut ranked = RankedResults::default();

        let query_vector = match embedder {
            Some(e) => match e.embed(query) {
                Ok(v) => Some(v),
                Err(err) => {
                    tracing::warn!(
                        target: "notekeep.search",
                        error = %err,
                        "query embedding failed, falling back to lexical-only"
                    );
                    None
                }
            },
            None => None,
        };
        if query_vector.is_some() && self.budget_spent(start) {
            return Err(self.timeout(start));
        }

        let mut semantic_ok = query_vector.is_some();
        let mut semantic_used = false;
        for partition in Partition::ALL {
            let lexical = db.search_partition(partition, query)?;

            let mut chunks = None;
            if let (Some(vector), true) = (&query_vector, semantic_ok) {
                if self.budget_spent(start) {
                    ranked.partial = true;
                } else {
                    match db.best_chunks(partition, vector) {
                        Ok(best) => {
                            chunks = Some(best);
                            semantic_used = true;
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "notekeep.search",
                                partition = %partition,
                                error = %err,
                                "semantic scoring failed, continuing lexical-only"
                            );
                            semantic_ok = false;
                        }
                    }
                }
            }

            let fused = fuse_partition(lexical, chunks.as_ref(), &self.fusion);
            self.collect(db, partition, fused, options, &mut ranked)?;

            if ranked.partial || ranked.results.len() >= options.limit {
                break;
            }
            if partition == Partition::Hot && self.budget_spent(start) {
                ranked.partial = true;
                break;
            }
        }

        if ranked.partial {
            if ranked.results.is_empty() {
                return Err(self.timeout(start));
            }
            tracing::debug!(
                target: "notekeep.search",
                "latency budget spent, returning partial results"
            );
        }

        ranked.results.truncate(options.limit);
        ranked.semantic = semantic_used;
        ranked.elapsed_ms = elapsed_ms(start);

        tracing::debug!(
            target: "notekeep.search",
            op = "search",
            results = ranked.results.len(),
            partial = ranked.partial,
            semantic = ranked.semantic,
            elapsed_ms = ranked.elapsed_ms,
            "search complete"
        );
        Ok(ranked)
    }

    fn budget_spent(&self, start: Instant) -> bool {
        start.elapsed() >= self.budget
    }

    fn timeout(&self, start: Instant) -> Error {
        Error::SearchTimeout {
            elapsed_ms: elapsed_ms(start),
            budget_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn collect(
        &self,
        db: &Database,
        partition: Partition,
        fused: Vec<FusedHit>,
        options: &SearchOptions,
        ranked: &mut RankedResults,
    ) -> Result<(), Error> {
        for hit in fused {
            let Some(note) = db.get_note(&hit.file_path)? else {
                continue;
            };
            if note.archived && !options.include_archive {
                continue;
            }
            if !options.filters.matches(&note) {
                continue;
            }
            ranked.results.push(SearchResult {
                file_path: hit.file_path,
                title: note.title,
                partition,
                score: hit.score,
                lexical_score: hit.lexical,
                semantic_score: hit.semantic,
                snippet: hit.snippet,
                category: note.category_tag,
                tags: note.tags,
                maturity: note.maturity,
            });
        }
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::test_support::create_test_db;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::SystemTime;
    use tempfile::TempDir;

    const DAY: u64 = 24 * 60 * 60;

    fn write_note(root: &Path, rel: &str, text: &str, age_days: u64) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_days * DAY))
            .unwrap();
    }

    fn setup() -> (TempDir, Database, Indexer) {
        let dir = TempDir::new().unwrap();
        write_note(dir.path(), "recent-a.md", "python asyncio patterns", 1);
        write_note(
            dir.path(),
            "recent-b.md",
            "---\ntags: [web]\ncategory: 20.01\nstatus: stable\n---\npython web frameworks python",
            2,
        );
        write_note(dir.path(), "old.md", "python python python packaging", 30);
        write_note(dir.path(), "archive/gone.md", "python legacy", 1);
        let mut db = create_test_db();
        let indexer = Indexer::new(dir.path(), 64).unwrap();
        indexer
            .index(&mut db, Some(&mut HashEmbedder::new()))
            .unwrap();
        (dir, db, indexer)
    }

    fn service() -> SearchService {
        SearchService::new(Duration::from_secs(30))
    }

    #[test]
    fn test_hot_results_precede_cold() {
        let (_dir, mut db, indexer) = setup();
        let ranked = service()
            .search(&mut db, &indexer, None, "python", &SearchOptions::default())
            .unwrap();

        let partitions: Vec<Partition> = ranked.results.iter().map(|r| r.partition).collect();
        assert_eq!(
            partitions,
            vec![Partition::Hot, Partition::Hot, Partition::Cold]
        );
        assert_eq!(ranked.results[2].file_path, "old.md");
        assert!(!ranked.semantic);
    }

    #[test]
    fn test_semantic_layer_keeps_partition_order() {
        let (_dir, mut db, indexer) = setup();
        let mut embedder = HashEmbedder::new();
        let ranked = service()
            .search(
                &mut db,
                &indexer,
                Some(&mut embedder),
                "python",
                &SearchOptions::default(),
            )
            .unwrap();

        assert!(ranked.semantic);
        let first_cold = ranked
            .results
            .iter()
            .position(|r| r.partition == Partition::Cold)
            .unwrap();
        assert!(ranked.results[..first_cold]
            .iter()
            .all(|r| r.partition == Partition::Hot));
        assert!(ranked.results[first_cold..]
            .iter()
            .all(|r| r.partition == Partition::Cold));
    }

    #[test]
    fn test_archive_is_opt_in() {
        let (_dir, mut db, indexer) = setup();
        let opts = SearchOptions {
            include_archive: true,
            ..SearchOptions::default()
        };
        let ranked = service()
            .search(&mut db, &indexer, None, "legacy", &opts)
            .unwrap();
        assert_eq!(ranked.results.len(), 1);

        let ranked = service()
            .search(&mut db, &indexer, None, "legacy", &SearchOptions::default())
            .unwrap();
        assert!(ranked.results.is_empty());
    }

    #[test]
    fn test_filters() {
        let (_dir, mut db, indexer) = setup();
        let opts = SearchOptions {
            filters: SearchFilters {
                category: Some("20".to_string()),
                tags: vec!["WEB".to_string()],
                maturity: vec![Maturity::Stable],
            },
            ..SearchOptions::default()
        };
        let ranked = service()
            .search(&mut db, &indexer, None, "python", &opts)
            .unwrap();
        assert_eq!(ranked.results.len(), 1);
        assert_eq!(ranked.results[0].file_path, "recent-b.md");
    }

    #[test]
    fn test_empty_query_and_limit() {
        let (_dir, mut db, indexer) = setup();
        let ranked = service()
            .search(&mut db, &indexer, None, "   ", &SearchOptions::default())
            .unwrap();
        assert!(ranked.results.is_empty());

        let opts = SearchOptions {
            limit: 0,
            ..SearchOptions::default()
        };
        assert!(service()
            .search(&mut db, &indexer, None, "python", &opts)
            .is_err());

        let opts = SearchOptions {
            limit: 1,
            ..SearchOptions::default()
        };
        let ranked = service()
            .search(&mut db, &indexer, None, "python", &opts)
            .unwrap();
        assert_eq!(ranked.results.len(), 1);
        assert_eq!(ranked.results[0].partition, Partition::Hot);
    }

    #[test]
    fn test_spent_budget_returns_partial_hot_results() {
        let (_dir, mut db, indexer) = setup();
        let ranked = SearchService::new(Duration::ZERO)
            .search(&mut db, &indexer, None, "python", &SearchOptions::default())
            .unwrap();
        assert!(ranked.partial);
        assert!(ranked.results.iter().all(|r| r.partition == Partition::Hot));
    }

    #[test]
    fn test_spent_budget_without_results_is_timeout() {
        let (_dir, mut db, indexer) = setup();
        let err = SearchService::new(Duration::ZERO)
            .search(&mut db, &indexer, None, "packaging", &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::SearchTimeout { .. }));
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed_batch(&mut self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, Error> {
            Err(Error::Inference("model unavailable".to_string()))
        }

        fn id(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_failing_embedder_degrades_to_lexical() {
        let (_dir, mut db, indexer) = setup();
        let mut embedder = FailingEmbedder;
        let ranked = service()
            .search(
                &mut db,
                &indexer,
                Some(&mut embedder),
                "python",
                &SearchOptions::default(),
            )
            .unwrap();
        assert!(!ranked.semantic);
        assert_eq!(ranked.results.len(), 3);
    }

    #[test]
    fn test_reindex_option_rebuilds_first() {
        let (dir, mut db, indexer) = setup();
        write_note(dir.path(), "fresh.md", "python brand new", 0);
        // Stored mtimes match for the old files; only a rebuild or an index
        // run would pick up fresh.md.
        let opts = SearchOptions {
            reindex: true,
            ..SearchOptions::default()
        };
        let ranked = service()
            .search(&mut db, &indexer, None, "brand", &opts)
            .unwrap();
        assert_eq!(ranked.results.len(), 1);
    }
}
