//! Prioritized worker pool with cooperative cancellation
//!
//! Tasks are submitted with a priority and optional callbacks, queued on a
//! binary heap (priority first, then submission order), and executed by a
//! fixed set of worker tasks. Cancellation is cooperative: cancelling a
//! running task raises its token and the task body decides when to stop.
//! Completion, failure and progress callbacks are marshaled to the host
//! through a [`CallbackDispatcher`](crate::dispatch::CallbackDispatcher),
//! never invoked on a worker.
//!
//! Terminal task records stick around for a grace period so late status
//! queries still resolve, then a background sweep drops them.

mod worker;

use crate::config::WorkerConfig;
use crate::dispatch::{CallbackContext, CallbackDispatcher, OnComplete, OnError, OnProgress};
use crate::error::{Error, Result};
use crate::types::{TaskId, TaskOutput, TaskPriority, TaskSnapshot, TaskStats, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Boxed future a task body produces
pub type TaskFuture = futures::future::BoxFuture<'static, Result<TaskOutput>>;

type TaskBody = Box<dyn FnOnce(TaskHandle) -> TaskFuture + Send>;

/// Submission options for a task
pub struct TaskSpec {
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Data-only context passed to every callback
    pub context: CallbackContext,
    /// Progress callback, dispatched to the host
    pub on_progress: Option<Arc<dyn OnProgress>>,
    /// Success callback, dispatched to the host
    pub on_complete: Option<Arc<dyn OnComplete>>,
    /// Failure callback, dispatched to the host
    pub on_error: Option<Arc<dyn OnError>>,
}

impl TaskSpec {
    /// Spec with the given callback context and normal priority
    pub fn new(context: CallbackContext) -> Self {
        Self {
            priority: TaskPriority::Normal,
            context,
            on_progress: None,
            on_complete: None,
            on_error: None,
        }
    }

    /// Set the scheduling priority
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a progress callback
    pub fn on_progress(mut self, cb: impl OnProgress + 'static) -> Self {
        self.on_progress = Some(Arc::new(cb));
        self
    }

    /// Attach a completion callback
    pub fn on_complete(mut self, cb: impl OnComplete + 'static) -> Self {
        self.on_complete = Some(Arc::new(cb));
        self
    }

    /// Attach a failure callback
    pub fn on_error(mut self, cb: impl OnError + 'static) -> Self {
        self.on_error = Some(Arc::new(cb));
        self
    }
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self::new(CallbackContext::default())
    }
}

/// Heap entry deciding execution order
#[derive(Debug, PartialEq, Eq)]
struct QueuedTask {
    priority: TaskPriority,
    queued_at_micros: i64,
    id: TaskId,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the smallest tuple pops first:
        // higher priority (lower value), then earlier submission, then id
        (other.priority, other.queued_at_micros, other.id).cmp(&(
            self.priority,
            self.queued_at_micros,
            self.id,
        ))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Mutable record of one task, owned by the pool
struct TaskRecord {
    priority: TaskPriority,
    status: TaskStatus,
    progress: f32,
    message: String,
    progress_data: serde_json::Map<String, serde_json::Value>,
    result: Option<TaskOutput>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    body: Option<TaskBody>,
    context: Arc<CallbackContext>,
    on_progress: Option<Arc<dyn OnProgress>>,
    on_complete: Option<Arc<dyn OnComplete>>,
    on_error: Option<Arc<dyn OnError>>,
}

impl TaskRecord {
    fn snapshot(&self, id: TaskId) -> TaskSnapshot {
        TaskSnapshot {
            id,
            priority: self.priority,
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            progress_data: self.progress_data.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

struct PoolInner {
    config: WorkerConfig,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    queue_notify: Notify,
    // Held only for short, await-free sections
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    accepting_new: AtomicBool,
    next_id: AtomicI64,
    shutdown: CancellationToken,
    dispatcher: CallbackDispatcher,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolInner {
    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, BinaryHeap<QueuedTask>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Handle injected into every task body
///
/// Carries the task's cancellation token and a progress reporter. Bodies
/// are expected to check cancellation at their own safe points.
pub struct TaskHandle {
    cancel: CancellationToken,
    reporter: ProgressReporter,
}

impl TaskHandle {
    /// The task's cancellation token, for use in `select!` or child operations
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bail out with `Error::Cancelled` if cancellation has been requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report progress: fraction in 0.0..=1.0 plus a message
    pub fn report(&self, progress: f32, message: &str) {
        self.reporter
            .report(progress, message, serde_json::Map::new());
    }

    /// Report progress with extra data fields merged into the snapshot
    pub fn report_with_data(
        &self,
        progress: f32,
        message: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) {
        self.reporter.report(progress, message, data);
    }
}

/// Updates a task's progress fields and fans out to the host
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<PoolInner>,
    id: TaskId,
}

impl ProgressReporter {
    fn report(
        &self,
        progress: f32,
        message: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) {
        let dispatch = {
            let mut tasks = self.inner.lock_tasks();
            let Some(record) = tasks.get_mut(&self.id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }

            record.progress = progress.clamp(0.0, 1.0);
            record.message = message.to_string();
            for (k, v) in data {
                record.progress_data.insert(k, v);
            }

            record
                .on_progress
                .clone()
                .map(|cb| (cb, record.context.clone(), record.snapshot(self.id)))
        };

        if let Some((cb, ctx, snapshot)) = dispatch {
            self.inner
                .dispatcher
                .dispatch(move || cb.call(&ctx, &snapshot));
        }
    }
}

/// Fixed-size pool of background workers executing prioritized tasks
///
/// Cheap to clone; all clones share the same queue and workers. Must be
/// created inside a tokio runtime.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start a pool with `config.worker_count` workers
    ///
    /// Callbacks flow through `dispatcher` to whatever holds the matching
    /// [`HostPump`](crate::dispatch::HostPump).
    pub fn new(config: WorkerConfig, dispatcher: CallbackDispatcher) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(Error::Config {
                message: "worker_count must be at least 1".into(),
                key: Some("worker_count".into()),
            });
        }

        let inner = Arc::new(PoolInner {
            config,
            queue: Mutex::new(BinaryHeap::new()),
            queue_notify: Notify::new(),
            tasks: Mutex::new(HashMap::new()),
            accepting_new: AtomicBool::new(true),
            next_id: AtomicI64::new(1),
            shutdown: CancellationToken::new(),
            dispatcher,
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(inner.config.worker_count + 1);
        for index in 0..inner.config.worker_count {
            let worker_inner = inner.clone();
            handles.push(tokio::spawn(worker::run_worker(worker_inner, index)));
        }
        handles.push(tokio::spawn(worker::run_sweeper(inner.clone())));

        match inner.workers.lock() {
            Ok(mut guard) => *guard = handles,
            Err(poisoned) => *poisoned.into_inner() = handles,
        }

        tracing::info!(workers = inner.config.worker_count, "Worker pool started");
        Ok(Self { inner })
    }

    /// Submit a task for background execution
    ///
    /// Never blocks; returns the new task's id immediately. The body is a
    /// closure producing the task's future, called on the worker that
    /// claims it with a [`TaskHandle`] injected.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShuttingDown` once shutdown has begun.
    pub fn submit<F>(&self, spec: TaskSpec, body: F) -> Result<TaskId>
    where
        F: FnOnce(TaskHandle) -> TaskFuture + Send + 'static,
    {
        if !self.inner.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = TaskId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();

        let record = TaskRecord {
            priority: spec.priority,
            status: TaskStatus::Pending,
            progress: 0.0,
            message: String::new(),
            progress_data: serde_json::Map::new(),
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            cancel: CancellationToken::new(),
            body: Some(Box::new(body)),
            context: Arc::new(spec.context),
            on_progress: spec.on_progress,
            on_complete: spec.on_complete,
            on_error: spec.on_error,
        };

        self.inner.lock_tasks().insert(id, record);
        self.inner.lock_queue().push(QueuedTask {
            priority: spec.priority,
            queued_at_micros: now.timestamp_micros(),
            id,
        });
        self.inner.queue_notify.notify_one();

        tracing::debug!(task_id = id.0, priority = ?spec.priority, "Task submitted");
        Ok(id)
    }

    /// Request cancellation of a task
    ///
    /// A pending task goes straight to `Cancelled` and never runs. A
    /// running task has its token raised; it reaches `Cancelled` when its
    /// body observes the token. Returns false for unknown or already
    /// terminal tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.inner.lock_tasks();
        let Some(record) = tasks.get_mut(&id) else {
            return false;
        };

        match record.status {
            TaskStatus::Pending => {
                record.status = TaskStatus::Cancelled;
                record.completed_at = Some(Utc::now());
                record.cancel.cancel();
                record.body = None;
                tracing::info!(task_id = id.0, "Pending task cancelled");
                true
            }
            TaskStatus::Running => {
                record.cancel.cancel();
                tracing::info!(task_id = id.0, "Cancellation requested for running task");
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending and running task, returning how many were affected
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = {
            let tasks = self.inner.lock_tasks();
            tasks
                .iter()
                .filter(|(_, r)| !r.status.is_terminal())
                .map(|(id, _)| *id)
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.cancel(id) {
                cancelled += 1;
            }
        }
        tracing::info!(cancelled, "Cancelled all tasks");
        cancelled
    }

    /// Snapshot of a task's current state
    pub fn status(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.inner.lock_tasks().get(&id).map(|r| r.snapshot(id))
    }

    /// Counts of retained tasks per status
    pub fn stats(&self) -> TaskStats {
        let tasks = self.inner.lock_tasks();
        let mut stats = TaskStats::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Gracefully shut the pool down
    ///
    /// Stops accepting submissions, cancels all tasks, and stops the
    /// workers. With `wait`, blocks up to `timeout` for workers to finish
    /// their current task; workers still busy after the timeout are
    /// abandoned, never aborted mid-poll.
    pub async fn shutdown(&self, wait: bool, timeout: Duration) {
        tracing::info!("Shutting down worker pool");

        self.inner.accepting_new.store(false, Ordering::SeqCst);
        let cancelled = self.cancel_all();
        tracing::debug!(cancelled, "Shutdown cancelled outstanding tasks");

        self.inner.shutdown.cancel();
        self.inner.queue_notify.notify_waiters();

        if wait {
            let handles: Vec<JoinHandle<()>> = {
                let mut workers = match self.inner.workers.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                workers.drain(..).collect()
            };

            match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
                Ok(_) => tracing::info!("All workers stopped"),
                Err(_) => {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "Workers still busy at shutdown timeout, abandoning")
                }
            }
        }

        tracing::info!("Worker pool shutdown complete");
    }

    /// True until shutdown begins
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting_new.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
