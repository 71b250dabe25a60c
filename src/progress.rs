//! Item-count progress tracking with a moving-average ETA
//!
//! A [`ProgressTracker`] counts completed items out of a known total and
//! estimates time remaining from the average duration of the last ten
//! completed items, so the ETA adapts to recent throughput rather than the
//! whole run. Subscribers are notified synchronously on every change;
//! a panicking subscriber is caught and logged, never propagated.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Number of recent item durations the ETA averages over
const ETA_WINDOW: usize = 10;

/// Lifecycle of a tracked operation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Not started
    #[default]
    Idle,
    /// Running
    Active,
    /// Temporarily suspended; elapsed time stops accumulating
    Paused,
    /// Finished successfully
    Completed,
    /// Stopped by the user
    Cancelled,
    /// Stopped by a failure
    Error,
}

/// Snapshot of tracked progress
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProgressState {
    /// Current lifecycle status
    pub status: ProgressStatus,
    /// Items completed so far
    pub current: u64,
    /// Total items expected
    pub total: u64,
    /// Latest status message
    pub message: String,
    /// Name of the item currently being processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    /// Completion percentage, 0.0 to 100.0
    pub percentage: f64,
    /// Seconds spent active (pauses excluded)
    pub elapsed_seconds: f64,
    /// Estimated seconds remaining; None until the first item completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Recent throughput in items per second
    pub items_per_second: f64,
}

struct Inner {
    status: ProgressStatus,
    current: u64,
    total: u64,
    message: String,
    current_item: Option<String>,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    total_paused: Duration,
    last_progress_at: Option<Instant>,
    item_durations: VecDeque<f64>,
}

impl Inner {
    fn idle() -> Self {
        Self {
            status: ProgressStatus::Idle,
            current: 0,
            total: 0,
            message: String::new(),
            current_item: None,
            started_at: None,
            paused_at: None,
            total_paused: Duration::ZERO,
            last_progress_at: None,
            item_durations: VecDeque::with_capacity(ETA_WINDOW),
        }
    }

    fn elapsed(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let mut paused = self.total_paused;
        if let Some(paused_at) = self.paused_at {
            paused += paused_at.elapsed();
        }
        started_at.elapsed().saturating_sub(paused)
    }

    fn advance_to(&mut self, current: u64, message: Option<&str>) {
        let clamped = if self.total > 0 {
            current.min(self.total)
        } else {
            current
        };
        let delta = clamped.saturating_sub(self.current);

        if delta > 0 {
            let now = Instant::now();
            if let Some(last) = self.last_progress_at {
                let per_item = now.duration_since(last).as_secs_f64() / delta as f64;
                // Record up to a full window of per-item samples
                for _ in 0..delta.min(ETA_WINDOW as u64) {
                    if self.item_durations.len() == ETA_WINDOW {
                        self.item_durations.pop_front();
                    }
                    self.item_durations.push_back(per_item);
                }
            }
            self.last_progress_at = Some(now);
        }

        self.current = clamped;
        if let Some(message) = message {
            self.message = message.to_string();
        }
    }

    fn snapshot(&self) -> ProgressState {
        let percentage = if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64 * 100.0).min(100.0)
        };

        let avg_item_secs = if self.item_durations.is_empty() {
            None
        } else {
            Some(self.item_durations.iter().sum::<f64>() / self.item_durations.len() as f64)
        };

        let remaining = self.total.saturating_sub(self.current);
        let eta_seconds = match (self.status, avg_item_secs) {
            (ProgressStatus::Active | ProgressStatus::Paused, Some(avg)) => {
                Some(avg * remaining as f64)
            }
            _ => None,
        };

        let items_per_second = match avg_item_secs {
            Some(avg) if avg > 0.0 => 1.0 / avg,
            _ => 0.0,
        };

        ProgressState {
            status: self.status,
            current: self.current,
            total: self.total,
            message: self.message.clone(),
            current_item: self.current_item.clone(),
            percentage,
            elapsed_seconds: self.elapsed().as_secs_f64(),
            eta_seconds,
            items_per_second,
        }
    }
}

/// Subscriber callback invoked synchronously on every state change
pub type ProgressSubscriber = Box<dyn Fn(&ProgressState) + Send + Sync>;

/// Tracks progress of a multi-item operation
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<ProgressSubscriber>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create an idle tracker
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::idle()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber; it fires on every subsequent state change
    pub fn subscribe(&self, subscriber: ProgressSubscriber) {
        self.lock_subscribers().push(subscriber);
    }

    /// Begin tracking `total` items
    pub fn start(&self, total: u64, message: impl Into<String>) {
        {
            let mut inner = self.lock();
            *inner = Inner::idle();
            inner.status = ProgressStatus::Active;
            inner.total = total;
            inner.message = message.into();
            let now = Instant::now();
            inner.started_at = Some(now);
            inner.last_progress_at = Some(now);
        }
        self.notify();
    }

    /// Set the absolute number of completed items
    ///
    /// Newly completed items feed the ETA window. Values beyond `total`
    /// are clamped.
    pub fn update(&self, current: u64, message: Option<&str>) {
        {
            let mut inner = self.lock();
            if inner.status != ProgressStatus::Active {
                return;
            }
            inner.advance_to(current, message);
        }
        self.notify();
    }

    /// Advance the completed count by `n`
    ///
    /// The new total is read and recorded under one lock, so concurrent
    /// increments never lose counts.
    pub fn increment(&self, n: u64) {
        {
            let mut inner = self.lock();
            if inner.status != ProgressStatus::Active {
                return;
            }
            let target = inner.current.saturating_add(n);
            inner.advance_to(target, None);
        }
        self.notify();
    }

    /// Name the item currently being processed
    pub fn set_current_item(&self, item: impl Into<String>) {
        {
            let mut inner = self.lock();
            inner.current_item = Some(item.into());
        }
        self.notify();
    }

    /// Suspend tracking; elapsed time stops accumulating
    pub fn pause(&self) {
        {
            let mut inner = self.lock();
            if inner.status != ProgressStatus::Active {
                return;
            }
            inner.status = ProgressStatus::Paused;
            inner.paused_at = Some(Instant::now());
        }
        self.notify();
    }

    /// Resume a paused tracker
    pub fn resume(&self) {
        {
            let mut inner = self.lock();
            if inner.status != ProgressStatus::Paused {
                return;
            }
            if let Some(paused_at) = inner.paused_at.take() {
                inner.total_paused += paused_at.elapsed();
            }
            inner.status = ProgressStatus::Active;
            // Exclude the pause from the next item's duration sample
            inner.last_progress_at = Some(Instant::now());
        }
        self.notify();
    }

    /// Mark the operation finished successfully
    pub fn complete(&self, message: impl Into<String>) {
        {
            let mut inner = self.lock();
            inner.status = ProgressStatus::Completed;
            inner.current = inner.total;
            inner.message = message.into();
            inner.current_item = None;
        }
        self.notify();
    }

    /// Mark the operation cancelled
    pub fn cancel(&self) {
        {
            let mut inner = self.lock();
            inner.status = ProgressStatus::Cancelled;
            inner.current_item = None;
        }
        self.notify();
    }

    /// Mark the operation failed
    pub fn error(&self, message: impl Into<String>) {
        {
            let mut inner = self.lock();
            inner.status = ProgressStatus::Error;
            inner.message = message.into();
        }
        self.notify();
    }

    /// Return the tracker to idle, clearing all counters
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            *inner = Inner::idle();
        }
        self.notify();
    }

    /// Current state snapshot
    pub fn state(&self) -> ProgressState {
        self.lock().snapshot()
    }

    fn notify(&self) {
        let state = self.state();
        let subscribers = self.lock_subscribers();
        for subscriber in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(&state))).is_err() {
                tracing::error!("Progress subscriber panicked");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<ProgressSubscriber>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Format an ETA for display: "Calculating..." until one is known
pub fn format_eta(eta_seconds: Option<f64>) -> String {
    match eta_seconds {
        None => "Calculating...".to_string(),
        Some(secs) if secs < 1.0 => "Complete".to_string(),
        Some(secs) => format_seconds(secs),
    }
}

/// Format an elapsed duration for display
pub fn format_elapsed(elapsed_seconds: f64) -> String {
    format_seconds(elapsed_seconds)
}

/// Format a progress state as "current/total (pct%)"
pub fn format_progress(state: &ProgressState) -> String {
    format!(
        "{}/{} ({:.0}%)",
        state.current, state.total, state.percentage
    )
}

fn format_seconds(secs: f64) -> String {
    let secs = secs.round() as u64;
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
