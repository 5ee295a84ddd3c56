//! Chunk vector storage helpers and similarity scoring.

use std::collections::HashMap;

use super::{Database, Error, Result};
use crate::partition::Partition;

/// Dimensionality of every stored chunk vector.
pub const EMBEDDING_DIMS: usize = 384;
const EMBEDDING_BLOB_SIZE: usize = EMBEDDING_DIMS * 4;

/// Convert a 384-dim vector into a little-endian BLOB.
///
/// # Errors
///
/// Returns `Error::MismatchedDimensions` if the vector length is not exactly 384.
pub fn vec_to_blob(vec: &[f32]) -> Result<Vec<u8>> {
    if vec.len() != EMBEDDING_DIMS {
        return Err(Error::MismatchedDimensions {
            expected: EMBEDDING_DIMS,
            actual: vec.len(),
        });
    }
    Ok(vec.iter().flat_map(|x| x.to_le_bytes()).collect())
}

/// Decode a little-endian BLOB back into a vector.
///
/// # Errors
///
/// Returns `Error::InvalidBlobSize` unless the blob is exactly 1,536 bytes.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() != EMBEDDING_BLOB_SIZE {
        return Err(Error::InvalidBlobSize {
            expected: EMBEDDING_BLOB_SIZE,
            actual: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Cosine similarity of two vectors.
///
/// # Errors
///
/// - `Error::EmptyVector` if either side is empty.
/// - `Error::MismatchedDimensions` if the lengths differ.
/// - `Error::InvalidEmbedding` on NaN or infinite components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.is_empty() || b.is_empty() {
        return Err(Error::EmptyVector);
    }
    if a.len() != b.len() {
        return Err(Error::MismatchedDimensions {
            expected: a.len(),
            actual: b.len(),
        });
    }
    if a.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return Err(Error::InvalidEmbedding(
            "Vector contains NaN or infinite values".to_string(),
        ));
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Best-matching chunk of a note against a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub similarity: f64,
    pub chunk_text: String,
}

impl Database {
    /// Score every chunk in a partition and keep the best one per note.
    ///
    /// Chunks whose stored BLOB is malformed are skipped with a warning rather
    /// than failing the whole search.
    pub fn best_chunks(
        &self,
        partition: Partition,
        query: &[f32],
    ) -> Result<HashMap<String, ChunkHit>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT file_path, chunk_id, chunk_text, vector FROM {}",
            partition.embeddings_table()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut best: HashMap<String, ChunkHit> = HashMap::new();
        for row in rows {
            let (path, chunk_id, chunk_text, blob) = row?;
            let similarity = match blob_to_vec(&blob).and_then(|v| cosine_similarity(query, &v)) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(
                        target: "notekeep.storage",
                        path = %path,
                        chunk_id,
                        error = %e,
                        "skipping unreadable chunk vector"
                    );
                    continue;
                }
            };
            let better = best
                .get(&path)
                .is_none_or(|current| similarity > current.similarity);
            if better {
                best.insert(
                    path,
                    ChunkHit {
                        chunk_id,
                        similarity,
                        chunk_text,
                    },
                );
            }
        }
        Ok(best)
    }
}
