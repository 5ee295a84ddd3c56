//! Composition root wiring storage, indexing, search, graph and tasks.
//!
//! An [`Engine`] owns one database connection (shared with its worker as
//! `Arc<Mutex<Database>>`), one embedder and exactly one background worker.
//! Foreground operations lock the connection for their duration; the worker
//! only locks it to claim and record tasks.

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use crate::config::{Config, EmbeddingBackend};
use crate::embedding::{Embedder, HashEmbedder, OnnxEmbedder};
use crate::errors::Error;
use crate::graph::{GraphBuilder, GraphFormat, GraphReport, KnowledgeGraph};
use crate::indexer::{IndexStats, Indexer};
use crate::lifecycle::ShutdownSignal;
use crate::quota::{Enforcer, EnvApprovalGate};
use crate::sanitize::{Pipeline, SanitizerConfig, os_username};
use crate::search::{RankedResults, SearchOptions, SearchService};
use crate::storage::Database;
use crate::storage::queue::{TaskRecord, TaskStatus, TaskType};
use crate::tasks::{
    AiProvider, LocalProvider, StopOutcome, TaskEvent, TaskQueue, Worker, WorkerStatus,
};

/// Settings key holding the generated anonymization key.
pub const ANONYMIZATION_KEY_SETTING: &str = "anonymization_key";

/// How long [`Engine::shutdown`] waits for an in-flight task.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The notekeep engine.
///
/// Methods that embed text (`index`, `reindex`, `search`) take `&mut self`
/// because the embedder mutates internal buffers.
pub struct Engine {
    config: Config,
    db: Arc<Mutex<Database>>,
    embedder: Option<Box<dyn Embedder>>,
    indexer: Indexer,
    search: SearchService,
    queue: TaskQueue,
    worker: Worker,
    released: bool,
}

impl Engine {
    /// Open the database and build every service with the offline
    /// [`LocalProvider`].
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the database cannot be
    /// opened or migrated, or the sanitizer cannot be built.
    pub fn open(config: Config) -> Result<Self, Error> {
        Self::open_with_provider(config, Arc::new(LocalProvider::new()))
    }

    /// Like [`Engine::open`] with a caller-supplied AI provider.
    pub fn open_with_provider(
        config: Config,
        provider: Arc<dyn AiProvider>,
    ) -> Result<Self, Error> {
        config.validate()?;
        config.ensure_directories()?;

        let db = Database::open(&config.database_path)?;
        let key = match &config.anonymization_key {
            Some(key) => key.clone(),
            None => db.get_or_insert_setting(
                ANONYMIZATION_KEY_SETTING,
                &uuid::Uuid::new_v4().to_string(),
            )?,
        };

        let mut usernames = vec![config.identity.clone()];
        usernames.extend(os_username());
        let sanitizer = Arc::new(Pipeline::new(
            SanitizerConfig::new(key.into_bytes(), config.max_payload_words)
                .with_usernames(usernames),
        )?);
        let user_hash = sanitizer.hash_identity(&config.identity);

        let enforcer = Enforcer::new(&config.blocked_paths, config.daily_task_quota)?;
        let queue = TaskQueue::new(enforcer, Arc::clone(&sanitizer), config.identity.clone());

        let db = Arc::new(Mutex::new(db));
        let mut worker = Worker::new(
            Arc::clone(&db),
            sanitizer,
            provider,
            user_hash,
            config.worker_config(),
        );
        if config.require_approval {
            worker = worker.with_approval_gate(Arc::new(EnvApprovalGate))?;
        }
        let recovered = worker.recover()?;

        let embedder = build_embedder(&config);
        let indexer = Indexer::new(&config.notes_root, config.index_batch_size)?;
        let search = SearchService::new(config.search_budget());

        tracing::info!(
            target: "notekeep.engine",
            database = %config.database_path.display(),
            notes_root = %config.notes_root.display(),
            embedder = embedder.as_ref().map(|e| e.id()).unwrap_or("none"),
            recovered,
            "engine opened"
        );

        Ok(Self {
            config,
            db,
            embedder,
            indexer,
            search,
            queue,
            worker,
            released: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether search and indexing use a semantic layer.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Database>, Error> {
        lock(&self.db)
    }

    /// Let `signal` interrupt indexing between batches.
    pub fn watch_shutdown(&mut self, signal: &ShutdownSignal) {
        self.indexer.set_cancel_flag(signal.flag());
    }

    /// Incremental scan of the notes root.
    pub fn index(&mut self) -> Result<IndexStats, Error> {
        let mut db = lock(&self.db)?;
        self.indexer.index(&mut db, self.embedder.as_deref_mut())
    }

    /// Drop the index and rebuild it from every file.
    pub fn reindex(&mut self) -> Result<IndexStats, Error> {
        let mut db = lock(&self.db)?;
        self.indexer.reindex(&mut db, self.embedder.as_deref_mut())
    }

    /// Hybrid search, hot results strictly before cold.
    pub fn search(&mut self, query: &str, options: &SearchOptions) -> Result<RankedResults, Error> {
        let mut db = lock(&self.db)?;
        self.search.search(
            &mut db,
            &self.indexer,
            self.embedder.as_deref_mut(),
            query,
            options,
        )
    }

    pub fn graph(&self, include_archive: bool) -> Result<KnowledgeGraph, Error> {
        let db = self.lock_db()?;
        GraphBuilder::build(&db, include_archive)
    }

    pub fn graph_stats(&self, include_archive: bool, top_n: usize) -> Result<GraphReport, Error> {
        Ok(self.graph(include_archive)?.report(top_n))
    }

    /// Render the graph and write it to `path`. Nothing else is written.
    pub fn export_graph(
        &self,
        path: &Path,
        format: GraphFormat,
        include_archive: bool,
    ) -> Result<(), Error> {
        let rendered = self.graph(include_archive)?.export(format)?;
        std::fs::write(path, rendered)?;
        tracing::info!(
            target: "notekeep.engine",
            op = "graph.export",
            path = %path.display(),
            ?format,
            "graph exported"
        );
        Ok(())
    }

    /// Validate, sanitize and queue a task. Returns its id.
    pub fn enqueue_task(&self, task_type: TaskType, payload: &Value) -> Result<i64, Error> {
        let mut db = self.lock_db()?;
        self.queue.enqueue(&mut db, task_type, payload)
    }

    pub fn task(&self, id: i64) -> Result<Option<TaskRecord>, Error> {
        Ok(self.lock_db()?.get_task(id)?)
    }

    /// Newest tasks first, optionally filtered by status.
    pub fn tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<TaskRecord>, Error> {
        Ok(self.lock_db()?.list_tasks(status, limit)?)
    }

    /// Receive an event for every task the worker finishes.
    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        self.worker.subscribe()
    }

    pub fn worker_status(&self) -> Result<WorkerStatus, Error> {
        self.worker.status()
    }

    /// Start the background worker. Returns `false` if it was already running.
    pub fn start_worker(&mut self) -> Result<bool, Error> {
        self.worker.start()
    }

    pub fn stop_worker(&mut self, timeout: Duration) -> StopOutcome {
        self.worker.stop(timeout)
    }

    /// Execute every pending task on the calling thread.
    pub fn run_pending(&self) -> Result<Vec<TaskEvent>, Error> {
        self.worker.drain()
    }

    /// Stop the worker and checkpoint the database. The connection closes
    /// when the engine is dropped.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let outcome = self.worker.stop(SHUTDOWN_TIMEOUT);
        self.lock_db()?.checkpoint()?;
        tracing::info!(target: "notekeep.engine", ?outcome, "engine shut down");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(target: "notekeep.engine", error = %err, "shutdown on drop failed");
        }
    }
}

fn lock(db: &Mutex<Database>) -> Result<MutexGuard<'_, Database>, Error> {
    db.lock()
        .map_err(|_| Error::Task("database lock poisoned".to_string()))
}

/// A model that cannot be loaded leaves search lexical-only.
fn build_embedder(config: &Config) -> Option<Box<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::Onnx => match OnnxEmbedder::new(&config.embedding_model) {
            Ok(engine) => Some(Box::new(engine)),
            Err(err) => {
                tracing::warn!(
                    target: "notekeep.engine",
                    model = %config.embedding_model,
                    error = %err,
                    "embedding model unavailable, continuing lexical-only"
                );
                None
            }
        },
        EmbeddingBackend::Hash => Some(Box::new(HashEmbedder::new())),
        EmbeddingBackend::None => None,
    }
}
