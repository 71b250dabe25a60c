//! Worker claim loop and terminal-record sweeper

use super::{PoolInner, ProgressReporter, TaskBody, TaskHandle};
use crate::types::{TaskId, TaskStatus};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// One worker: claim the highest-priority pending task, run it, repeat
pub(super) async fn run_worker(inner: Arc<PoolInner>, index: usize) {
    tracing::debug!(worker = index, "Worker started");

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        match claim_next(&inner) {
            Some((id, body, handle)) => {
                tracing::debug!(worker = index, task_id = id.0, "Task claimed");
                execute(&inner, id, body, handle).await;
            }
            None => {
                // Idle until new work, a poll tick, or shutdown
                tokio::select! {
                    _ = inner.queue_notify.notified() => {}
                    _ = tokio::time::sleep(inner.config.poll_interval()) => {}
                    _ = inner.shutdown.cancelled() => break,
                }
            }
        }
    }

    tracing::debug!(worker = index, "Worker stopped");
}

/// Pop queue entries until one maps to a still-pending record
fn claim_next(inner: &Arc<PoolInner>) -> Option<(TaskId, TaskBody, TaskHandle)> {
    loop {
        let queued = inner.lock_queue().pop()?;
        let id = queued.id;

        let mut tasks = inner.lock_tasks();
        let Some(record) = tasks.get_mut(&id) else {
            // Swept before it ran; nothing to do
            continue;
        };
        if record.status != TaskStatus::Pending {
            continue;
        }
        if record.cancel.is_cancelled() {
            record.status = TaskStatus::Cancelled;
            record.completed_at = Some(Utc::now());
            record.body = None;
            continue;
        }

        record.status = TaskStatus::Running;
        record.started_at = Some(Utc::now());
        let Some(body) = record.body.take() else {
            // Should not happen for a pending record; treat as failed
            record.status = TaskStatus::Failed;
            record.error = Some("task body missing".into());
            record.completed_at = Some(Utc::now());
            continue;
        };

        let handle = TaskHandle {
            cancel: record.cancel.clone(),
            reporter: ProgressReporter {
                inner: inner.clone(),
                id,
            },
        };
        return Some((id, body, handle));
    }
}

/// Drive a claimed task to a terminal state and fan out its callback
async fn execute(inner: &Arc<PoolInner>, id: TaskId, body: TaskBody, handle: TaskHandle) {
    let future = body(handle);
    let outcome = AssertUnwindSafe(future).catch_unwind().await;

    // Dispatching is a non-blocking channel send, so it stays inside the
    // lock: a terminal status is never visible before its callback is queued
    let mut tasks = inner.lock_tasks();
    let Some(record) = tasks.get_mut(&id) else {
        return;
    };
    record.completed_at = Some(Utc::now());

    match outcome {
        Ok(Ok(output)) => {
            record.status = TaskStatus::Completed;
            record.progress = 1.0;
            record.result = Some(output);
            tracing::info!(task_id = id.0, "Task completed");
            if let Some(cb) = record.on_complete.clone() {
                let ctx = record.context.clone();
                let snapshot = record.snapshot(id);
                inner.dispatcher.dispatch(move || cb.call(&ctx, &snapshot));
            }
        }
        Ok(Err(err)) if err.is_cancelled() || record.cancel.is_cancelled() => {
            record.status = TaskStatus::Cancelled;
            tracing::info!(task_id = id.0, "Task cancelled");
        }
        Ok(Err(err)) => {
            record.status = TaskStatus::Failed;
            record.error = Some(err.to_string());
            tracing::warn!(task_id = id.0, error = %err, "Task failed");
            if let Some(cb) = record.on_error.clone() {
                let ctx = record.context.clone();
                let snapshot = record.snapshot(id);
                inner.dispatcher.dispatch(move || cb.call(&ctx, &snapshot));
            }
        }
        Err(panic) => {
            let reason = panic_message(panic);
            record.status = TaskStatus::Failed;
            record.error = Some(format!("task panicked: {reason}"));
            tracing::error!(task_id = id.0, reason = %reason, "Task panicked");
            if let Some(cb) = record.on_error.clone() {
                let ctx = record.context.clone();
                let snapshot = record.snapshot(id);
                inner.dispatcher.dispatch(move || cb.call(&ctx, &snapshot));
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Periodically drop terminal records past the retention grace period
pub(super) async fn run_sweeper(inner: Arc<PoolInner>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.config.sweep_interval) => {}
            _ = inner.shutdown.cancelled() => break,
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(inner.config.completed_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut tasks = inner.lock_tasks();
        let before = tasks.len();
        tasks.retain(|_, record| {
            !(record.status.is_terminal()
                && record.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let swept = before - tasks.len();
        drop(tasks);

        if swept > 0 {
            tracing::debug!(swept, "Swept old terminal task records");
        }
    }
}
