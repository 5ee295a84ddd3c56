//! Content indexer: scans the notes root into the partitioned store.
//!
//! Change detection is two-level. A file whose mtime matches the stored
//! `modified_epoch` is not read at all; a file whose content hash matches is
//! read but produces no write. Changed files are written in batches, one
//! transaction per batch.

pub mod frontmatter;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::chunking::chunk_text;
use crate::embedding::Embedder;
use crate::errors::Error;
use crate::partition::{HOT_WINDOW_SECS, Partition};
use crate::storage::notes::{self, ChunkRow, NoteDocument, NoteRecord};
use crate::storage::{Database, timestamp_now};

use self::frontmatter::NoteParser;

/// A file that could not be indexed. The scan continues past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexError {
    pub path: String,
    pub reason: String,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Note files found on disk.
    pub scanned: usize,
    /// Notes written (new or changed).
    pub indexed: usize,
    /// Read, but content hash unchanged: nothing written.
    pub unchanged: usize,
    /// mtime unchanged: not read.
    pub skipped: usize,
    /// Moved hot → cold because they aged out of the window.
    pub demoted: usize,
    /// Deleted because the file no longer exists.
    pub removed: usize,
    pub chunks: usize,
    pub hot: i64,
    pub cold: i64,
    pub errors: Vec<IndexError>,
    /// Shutdown was requested; the scan stopped after a committed batch.
    pub interrupted: bool,
}

/// Scans one notes root.
#[derive(Debug)]
pub struct Indexer {
    root: PathBuf,
    batch_size: usize,
    parser: NoteParser,
    cancel: Option<Arc<AtomicBool>>,
}

impl Indexer {
    pub fn new(root: &Path, batch_size: usize) -> Result<Self, Error> {
        Ok(Self {
            root: root.to_path_buf(),
            batch_size: batch_size.max(1),
            parser: NoteParser::new()?,
            cancel: None,
        })
    }

    /// Stop scanning after the current batch once `flag` is set.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Incremental scan.
    ///
    /// # Errors
    ///
    /// Returns error if the notes root is missing or a batch cannot be
    /// committed. Per-file problems are reported in `IndexStats::errors`.
    pub fn index(
        &self,
        db: &mut Database,
        embedder: Option<&mut (dyn Embedder + '_)>,
    ) -> Result<IndexStats, Error> {
        self.run(db, embedder, false)
    }

    /// Drop every index table and index all files again, ignoring mtimes.
    pub fn reindex(
        &self,
        db: &mut Database,
        embedder: Option<&mut (dyn Embedder + '_)>,
    ) -> Result<IndexStats, Error> {
        self.ensure_root()?;
        db.write(|tx| notes::clear_index(tx))?;
        tracing::info!(target: "notekeep.indexer", "index cleared for full rebuild");
        self.run(db, embedder, true)
    }

    fn ensure_root(&self) -> Result<(), Error> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Index {
                path: self.root.display().to_string(),
                reason: "notes root is not a directory".to_string(),
            })
        }
    }

    fn run(
        &self,
        db: &mut Database,
        mut embedder: Option<&mut (dyn Embedder + '_)>,
        force: bool,
    ) -> Result<IndexStats, Error> {
        self.ensure_root()?;
        let now = Utc::now().timestamp();
        let indexed_at = timestamp_now();
        let stored = db.note_fingerprints()?;

        let mut stats = IndexStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch: Vec<NoteDocument> = Vec::with_capacity(self.batch_size);
        let mut walk_failed = false;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    walk_failed = true;
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    record_error(&mut stats, path, e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_note_file(entry.path()) {
                continue;
            }

            stats.scanned += 1;
            let Some(rel) = relative_path(&self.root, entry.path()) else {
                record_error(
                    &mut stats,
                    entry.path().display().to_string(),
                    "path is not valid UTF-8".to_string(),
                );
                continue;
            };
            seen.insert(rel.clone());

            let modified = entry
                .metadata()
                .map_err(|e| e.to_string())
                .and_then(|m| m.modified().map_err(|e| e.to_string()));
            let mtime = match modified {
                Ok(modified) => epoch_secs(modified),
                Err(reason) => {
                    record_error(&mut stats, rel, reason);
                    continue;
                }
            };

            let previous = stored.get(&rel);
            if !force && previous.is_some_and(|(epoch, _)| *epoch == mtime) {
                stats.skipped += 1;
                continue;
            }

            let bytes = match fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    record_error(&mut stats, rel, e.to_string());
                    continue;
                }
            };
            let hash = hex::encode(Sha256::digest(&bytes));
            if !force && previous.is_some_and(|(_, h)| *h == hash) {
                stats.unchanged += 1;
                continue;
            }
            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(_) => {
                    record_error(&mut stats, rel, "content is not valid UTF-8".to_string());
                    continue;
                }
            };

            let doc = self.build_document(&rel, &content, hash, mtime, now, &mut embedder);
            stats.chunks += doc.chunks.len();
            batch.push(doc);
            if batch.len() >= self.batch_size {
                stats.indexed += flush(db, &mut batch, &indexed_at)?;
                if self.cancelled() {
                    stats.interrupted = true;
                    break;
                }
            }
        }
        stats.indexed += flush(db, &mut batch, &indexed_at)?;

        if stats.interrupted {
            tracing::warn!(
                target: "notekeep.indexer",
                indexed = stats.indexed,
                "shutdown requested, index run stopped early"
            );
        } else if walk_failed {
            tracing::warn!(
                target: "notekeep.indexer",
                "directory walk reported errors, skipping removal of missing notes"
            );
        } else {
            let gone: Vec<&String> = stored.keys().filter(|p| !seen.contains(*p)).collect();
            if !gone.is_empty() {
                db.write(|tx| {
                    for path in &gone {
                        notes::delete_note(tx, path)?;
                    }
                    Ok(())
                })?;
                stats.removed = gone.len();
            }
        }

        let aged = db.hot_notes_older_than(now - HOT_WINDOW_SECS)?;
        if !aged.is_empty() {
            stats.demoted = db.write(|tx| {
                let mut moved = 0;
                for path in &aged {
                    if notes::move_partition(tx, path, Partition::Cold)? {
                        moved += 1;
                    }
                }
                Ok(moved)
            })?;
        }

        stats.hot = db.partition_count(Partition::Hot)?;
        stats.cold = db.partition_count(Partition::Cold)?;

        tracing::info!(
            target: "notekeep.indexer",
            op = if force { "reindex" } else { "index" },
            scanned = stats.scanned,
            indexed = stats.indexed,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            demoted = stats.demoted,
            removed = stats.removed,
            errors = stats.errors.len(),
            interrupted = stats.interrupted,
            "index run complete"
        );
        Ok(stats)
    }

    fn build_document(
        &self,
        rel: &str,
        content: &str,
        content_hash: String,
        mtime: i64,
        now: i64,
        embedder: &mut Option<&mut (dyn Embedder + '_)>,
    ) -> NoteDocument {
        let parsed = self.parser.parse(rel, content);
        let title = parsed.title.clone().unwrap_or_else(|| file_stem(rel));
        let category_tag = parsed.category.clone().or_else(|| johnny_decimal_category(rel));

        let chunk_texts = chunk_text(&parsed.body);
        let mut chunks = Vec::new();
        if let (Some(e), false) = (embedder.as_deref_mut(), chunk_texts.is_empty()) {
            let refs: Vec<&str> = chunk_texts.iter().map(String::as_str).collect();
            match e.embed_batch(&refs) {
                Ok(vectors) => {
                    chunks = chunk_texts
                        .into_iter()
                        .zip(vectors)
                        .map(|(text, vector)| ChunkRow { text, vector })
                        .collect();
                }
                Err(err) => {
                    tracing::warn!(
                        target: "notekeep.indexer",
                        path = rel,
                        error = %err,
                        "embedding failed, continuing without vectors"
                    );
                    *embedder = None;
                }
            }
        }

        NoteDocument {
            record: NoteRecord {
                file_path: rel.to_string(),
                content_hash,
                title,
                category_tag,
                tags: parsed.tags,
                aliases: parsed.aliases,
                maturity: parsed.maturity.unwrap_or_default(),
                modified_epoch: mtime,
                archived: is_archived(rel),
                partition: Partition::classify(mtime, now),
            },
            content: parsed.body,
            chunks,
            links: parsed.links,
        }
    }
}

fn flush(db: &mut Database, batch: &mut Vec<NoteDocument>, indexed_at: &str) -> Result<usize, Error> {
    if batch.is_empty() {
        return Ok(0);
    }
    db.write(|tx| {
        for doc in batch.iter() {
            notes::upsert_note(tx, doc, indexed_at)?;
        }
        Ok(())
    })?;
    let written = batch.len();
    tracing::debug!(target: "notekeep.indexer", op = "batch.commit", written, "batch committed");
    batch.clear();
    Ok(written)
}

fn record_error(stats: &mut IndexStats, path: String, reason: String) {
    tracing::warn!(target: "notekeep.indexer", path = %path, reason = %reason, "skipping note");
    stats.errors.push(IndexError { path, reason });
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn is_note_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn epoch_secs(time: std::time::SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

fn file_stem(rel: &str) -> String {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

/// True when a directory on the path is named `archive` or `archives`.
pub fn is_archived(rel: &str) -> bool {
    let mut dirs: Vec<&str> = rel.split('/').collect();
    dirs.pop();
    dirs.iter()
        .any(|d| d.eq_ignore_ascii_case("archive") || d.eq_ignore_ascii_case("archives"))
}

/// First directory whose name starts with a Johnny-Decimal id (`NN.NN` or `NN-NN`).
pub fn johnny_decimal_category(rel: &str) -> Option<String> {
    let mut dirs: Vec<&str> = rel.split('/').collect();
    dirs.pop();
    dirs.into_iter().find_map(|dir| {
        let b = dir.as_bytes();
        let is_id = b.len() >= 5
            && b[0].is_ascii_digit()
            && b[1].is_ascii_digit()
            && (b[2] == b'.' || b[2] == b'-')
            && b[3].is_ascii_digit()
            && b[4].is_ascii_digit();
        is_id.then(|| dir[..5].to_string())
    })
}
