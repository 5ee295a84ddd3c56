//! The background worker.
//!
//! One named thread per [`Worker`] polls the queue: claim the oldest pending
//! task, run its handler without holding the database lock, then record the
//! outcome. Idle iterations sleep for the poll interval; consecutive errors
//! back off exponentially up to a cap. The sleep is interruptible so `stop`
//! returns promptly, but an in-flight handler always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;

use super::TaskEvent;
use super::handlers::{HandlerRegistry, TaskContext};
use super::provider::AiProvider;
use crate::errors::Error;
use crate::quota::ApprovalGate;
use crate::sanitize::Pipeline;
use crate::storage::queue::{QueueCounts, TaskRecord, TaskStatus};
use crate::storage::{Database, format_timestamp};

const THREAD_NAME: &str = "notekeep-worker";
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    /// `processing` tasks claimed longer ago than this are requeued on start.
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            stale_after: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    /// How often a running worker looks for claims orphaned by a dead
    /// process: half the stale threshold, never faster than one poll.
    pub fn sweep_interval(&self) -> Duration {
        (self.stale_after / 2).max(self.poll_interval)
    }

    /// `min(poll_interval * 2^errors, max_backoff)`.
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        let factor = 1u32 << consecutive_errors.min(16);
        self.poll_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The thread exited within the timeout.
    Stopped,
    /// The thread is still finishing a task; it will exit afterwards.
    TimedOut,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub queue: QueueCounts,
}

struct Shared {
    db: Arc<Mutex<Database>>,
    registry: HandlerRegistry,
    sanitizer: Arc<Pipeline>,
    provider: Arc<dyn AiProvider>,
    gate: Option<Arc<dyn ApprovalGate>>,
    user_hash: String,
    config: WorkerConfig,
    stop: AtomicBool,
    subscribers: Mutex<Vec<Sender<TaskEvent>>>,
}

struct Running {
    handle: JoinHandle<()>,
    wake: Sender<()>,
}

/// Background task executor.
pub struct Worker {
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl Worker {
    pub fn new(
        db: Arc<Mutex<Database>>,
        sanitizer: Arc<Pipeline>,
        provider: Arc<dyn AiProvider>,
        user_hash: impl Into<String>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                db,
                registry: HandlerRegistry::with_defaults(),
                sanitizer,
                provider,
                gate: None,
                user_hash: user_hash.into(),
                config,
                stop: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            running: None,
        }
    }

    /// Require approval before dispatch.
    ///
    /// # Errors
    ///
    /// Fails once the worker thread has been started: the running thread
    /// would never see the gate.
    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Result<Self, Error> {
        self.configure()?.gate = Some(gate);
        Ok(self)
    }

    /// Replace the handler set. Same restriction as [`Worker::with_approval_gate`].
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Result<Self, Error> {
        self.configure()?.registry = registry;
        Ok(self)
    }

    fn configure(&mut self) -> Result<&mut Shared, Error> {
        Arc::get_mut(&mut self.shared).ok_or_else(|| {
            Error::Task("worker configuration is frozen once started".to_string())
        })
    }

    /// Receive a [`TaskEvent`] for every task this worker finishes.
    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Requeue stale claims, then spawn the worker thread.
    ///
    /// Returns `false` if the thread was already running.
    pub fn start(&mut self) -> Result<bool, Error> {
        if self.is_running() {
            return Ok(false);
        }
        if let Some(finished) = self.running.take() {
            join(finished.handle);
        }

        self.shared.requeue_stale()?;
        self.shared.stop.store(false, Ordering::Release);

        let (wake, sleeper) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || shared.run_loop(sleeper))?;
        self.running = Some(Running { handle, wake });

        tracing::info!(
            target: "notekeep.worker",
            poll_ms = self.shared.config.poll_interval.as_millis() as u64,
            "worker started"
        );
        Ok(true)
    }

    /// Ask the thread to exit and wait up to `timeout` for it.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(running) = self.running.take() else {
            return StopOutcome::NotRunning;
        };
        self.shared.stop.store(true, Ordering::Release);
        let _ = running.wake.send(());

        let deadline = Instant::now() + timeout;
        while !running.handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    target: "notekeep.worker",
                    timeout_ms = timeout.as_millis() as u64,
                    "worker still busy at stop timeout"
                );
                self.running = Some(running);
                return StopOutcome::TimedOut;
            }
            thread::sleep(STOP_POLL);
        }
        join(running.handle);
        tracing::info!(target: "notekeep.worker", "worker stopped");
        StopOutcome::Stopped
    }

    /// Claim and execute at most one task on the calling thread.
    pub fn run_once(&self) -> Result<Option<TaskEvent>, Error> {
        self.shared.run_once()
    }

    /// Run tasks on the calling thread until the queue has no pending work.
    pub fn drain(&self) -> Result<Vec<TaskEvent>, Error> {
        let mut events = Vec::new();
        while let Some(event) = self.shared.run_once()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Requeue tasks left in `processing` by an interrupted run.
    pub fn recover(&self) -> Result<usize, Error> {
        self.shared.requeue_stale()
    }

    pub fn status(&self) -> Result<WorkerStatus, Error> {
        let queue = self.shared.lock_db()?.queue_counts()?;
        Ok(WorkerStatus {
            running: self.is_running(),
            queue,
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            self.shared.stop.store(true, Ordering::Release);
            let _ = running.wake.send(());
        }
    }
}

fn join(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(target: "notekeep.worker", "worker thread panicked");
    }
}

/// RFC 3339 instant `stale_after` ago.
pub fn stale_cutoff(stale_after: Duration) -> String {
    let delta = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
    let at = Utc::now()
        .checked_sub_signed(delta)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    format_timestamp(at)
}

impl Shared {
    fn lock_db(&self) -> Result<MutexGuard<'_, Database>, Error> {
        self.db
            .lock()
            .map_err(|_| Error::Task("database lock poisoned".to_string()))
    }

    fn requeue_stale(&self) -> Result<usize, Error> {
        let cutoff = stale_cutoff(self.config.stale_after);
        Ok(self.lock_db()?.requeue_stale_tasks(&cutoff)?)
    }

    fn run_loop(&self, sleeper: Receiver<()>) {
        let mut consecutive_errors: u32 = 0;
        let sweep_every = self.config.sweep_interval();
        // `start` swept just before spawning this thread.
        let mut last_sweep = Instant::now();
        while !self.stop.load(Ordering::Acquire) {
            if last_sweep.elapsed() >= sweep_every {
                last_sweep = Instant::now();
                if let Err(err) = self.requeue_stale() {
                    tracing::warn!(
                        target: "notekeep.worker",
                        error = %err,
                        "stale claim sweep failed"
                    );
                }
            }

            let delay = match self.run_once() {
                Ok(Some(event)) if event.status == TaskStatus::Done => {
                    consecutive_errors = 0;
                    continue;
                }
                Ok(Some(_)) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.config.backoff(consecutive_errors)
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    self.config.poll_interval
                }
                Err(err) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self.config.backoff(consecutive_errors);
                    tracing::warn!(
                        target: "notekeep.worker",
                        error = %err,
                        consecutive_errors,
                        backoff_ms = delay.as_millis() as u64,
                        "worker iteration failed"
                    );
                    delay
                }
            };

            match sleeper.recv_timeout(delay) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn run_once(&self) -> Result<Option<TaskEvent>, Error> {
        let task = self.lock_db()?.claim_next_task()?;
        let Some(task) = task else {
            return Ok(None);
        };

        let started = Instant::now();
        let outcome = self.execute(&task);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let event = match outcome {
            Ok(result) => {
                self.lock_db()?.complete_task(task.id, &result)?;
                tracing::info!(
                    target: "notekeep.worker",
                    op = "task.done",
                    task_id = task.id,
                    task_type = %task.task_type,
                    elapsed_ms,
                    "task completed"
                );
                TaskEvent {
                    task_id: task.id,
                    task_type: task.task_type,
                    status: TaskStatus::Done,
                    result: Some(result),
                    error: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.lock_db()?.fail_task(task.id, &message)?;
                tracing::warn!(
                    target: "notekeep.worker",
                    op = "task.failed",
                    task_id = task.id,
                    task_type = %task.task_type,
                    elapsed_ms,
                    error = %message,
                    "task failed"
                );
                TaskEvent {
                    task_id: task.id,
                    task_type: task.task_type,
                    status: TaskStatus::Failed,
                    result: None,
                    error: Some(message),
                }
            }
        };

        self.notify(&event);
        Ok(Some(event))
    }

    fn execute(&self, task: &TaskRecord) -> Result<Value, Error> {
        if let Some(gate) = &self.gate {
            if !gate.is_approved(task) {
                return Err(Error::Security(format!("task {} is not approved", task.id)));
            }
        }
        let handler = self
            .registry
            .get(task.task_type)
            .ok_or_else(|| Error::Task(format!("no handler for {}", task.task_type)))?;

        let ctx = TaskContext {
            sanitizer: &self.sanitizer,
            provider: &*self.provider,
            audit: &*self.db,
            user_hash: &self.user_hash,
        };
        handler.handle(task, &ctx)
    }

    fn notify(&self, event: &TaskEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|s| s.send(event.clone()).is_ok());
        }
    }
}
