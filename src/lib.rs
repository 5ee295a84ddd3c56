//! notekeep - local hybrid note search with a link graph and sanitized AI tasks.
//!
//! Notes under a root directory are indexed into SQLite, partitioned by
//! recency into a hot (last 7 days) and a cold partition. Search combines
//! FTS5 BM25 with optional embeddings and always ranks hot results before
//! cold ones. Links between notes form a knowledge graph. Classification,
//! summarization and synthesis run on a background worker fed by a durable
//! queue, and every payload passes a four-stage sanitizer before any
//! provider sees it.
//!
//! All operations are synchronous (no async/await required).
//!
//! # Example
//!
//! ```no_run
//! use notekeep::{Config, Engine, SearchOptions, TaskType};
//! use serde_json::json;
//!
//! let config = Config::load().expect("Failed to load config");
//! let mut engine = Engine::open(config).expect("Failed to open engine");
//!
//! let stats = engine.index().expect("Indexing failed");
//! println!("indexed {} notes", stats.indexed);
//!
//! let ranked = engine
//!     .search("ownership", &SearchOptions::default())
//!     .expect("Search failed");
//! for hit in ranked.results {
//!     println!("[{}] {:.3} {}", hit.partition, hit.score, hit.file_path);
//! }
//!
//! let id = engine
//!     .enqueue_task(TaskType::Summarize, &json!({ "path": "10-19 Work/plan.md" }))
//!     .expect("Enqueue failed");
//! engine.run_pending().expect("Worker failed");
//! println!("{:?}", engine.task(id));
//! ```
//!
//! # Mutability Requirements
//!
//! Methods that generate embeddings (`index`, `reindex`, `search`) require
//! `&mut self` because the embedding engine mutates internal state for ONNX
//! tensor allocations.

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod fusion;
pub mod graph;
pub mod indexer;
pub mod lifecycle;
pub mod partition;
pub mod quota;
pub mod sanitize;
pub mod search;
pub mod storage;
pub mod tasks;

// Re-export public API
pub use config::{Config, EmbeddingBackend};
pub use embedding::{EMBEDDING_DIMS, Embedder, HashEmbedder, OnnxEmbedder};
pub use engine::Engine;
pub use errors::Error;
pub use graph::{GraphFormat, GraphReport, KnowledgeGraph};
pub use indexer::IndexStats;
pub use lifecycle::ShutdownSignal;
pub use partition::Partition;
pub use sanitize::{Pipeline, SanitizedPayload};
pub use search::{RankedResults, SearchFilters, SearchOptions, SearchResult};
pub use storage::Database;
pub use storage::notes::Maturity;
pub use storage::queue::{TaskRecord, TaskStatus, TaskType};
pub use tasks::{StopOutcome, TaskEvent, WorkerStatus};
