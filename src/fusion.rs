//! Weighted score fusion of lexical and semantic matches within one partition.
//!
//! Lexical relevance (`-bm25`) is min-max normalized per partition so it
//! shares a 0..1 scale with cosine similarity, then
//! `score = lexical_weight * lexical + semantic_weight * semantic`.
//! Partitions are fused independently; the caller concatenates them hot first.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::storage::embedding::ChunkHit;
use crate::storage::fts::FtsHit;

/// Fusion weights and the admission bar for semantic-only matches.
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    /// Minimum cosine similarity for a note with no lexical match.
    pub semantic_only_threshold: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.6,
            semantic_weight: 0.4,
            semantic_only_threshold: 0.35,
        }
    }
}

/// One fused candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHit {
    pub file_path: String,
    pub score: f64,
    /// Normalized lexical relevance, absent for semantic-only matches.
    pub lexical: Option<f64>,
    /// Best-chunk cosine similarity, absent when there was no semantic layer
    /// or the note has no chunks.
    pub semantic: Option<f64>,
    pub snippet: Option<String>,
}

/// Fuse one partition's matches.
///
/// With `semantic = None` the result is lexical-only: order is unchanged and
/// `score` is the normalized lexical relevance. Output is sorted by score
/// descending with ties broken by path.
pub fn fuse_partition(
    lexical: Vec<FtsHit>,
    semantic: Option<&HashMap<String, ChunkHit>>,
    config: &FusionConfig,
) -> Vec<FusedHit> {
    let (min, max) = lexical
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
            (lo.min(h.score), hi.max(h.score))
        });
    let normalize = |score: f64| {
        if max > min {
            (score - min) / (max - min)
        } else {
            1.0
        }
    };

    let mut fused: Vec<FusedHit> = Vec::with_capacity(lexical.len());
    let mut seen: HashSet<String> = HashSet::with_capacity(lexical.len());

    for hit in lexical {
        let lex = normalize(hit.score);
        let sem = semantic
            .and_then(|s| s.get(&hit.file_path))
            .map(|c| c.similarity.clamp(0.0, 1.0));
        let score = match semantic {
            Some(_) => {
                config.lexical_weight * lex + config.semantic_weight * sem.unwrap_or(0.0)
            }
            None => lex,
        };
        seen.insert(hit.file_path.clone());
        fused.push(FusedHit {
            file_path: hit.file_path,
            score,
            lexical: Some(lex),
            semantic: sem,
            snippet: (!hit.snippet.is_empty()).then_some(hit.snippet),
        });
    }

    if let Some(semantic) = semantic {
        for (path, chunk) in semantic {
            if seen.contains(path) || chunk.similarity < config.semantic_only_threshold {
                continue;
            }
            let sem = chunk.similarity.clamp(0.0, 1.0);
            fused.push(FusedHit {
                file_path: path.clone(),
                score: config.semantic_weight * sem,
                lexical: None,
                semantic: Some(sem),
                snippet: Some(chunk.chunk_text.chars().take(160).collect()),
            });
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    fused
}
