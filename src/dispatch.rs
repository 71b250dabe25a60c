//! Callback marshaling to the host's own thread
//!
//! GUI hosts with a single-threaded execution context cannot be called into
//! from worker threads. Workers therefore hand completed callbacks to a
//! [`CallbackDispatcher`], and the host drains them on its own thread with
//! [`HostPump::pump`], typically a bounded batch per UI tick.
//!
//! Two safety properties hold at this boundary:
//! - the [`HostProbe`] is re-checked immediately before each callback runs,
//!   so callbacks never touch a host context that has since gone away
//! - a panicking callback is caught and logged; it cannot affect task
//!   state, other queued callbacks, or the worker pool

use crate::types::TaskSnapshot;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Host liveness seam
///
/// Implemented by the embedder against whatever "is my context still valid"
/// notion the host has (window handle alive, plugin not unloaded, ...).
pub trait HostProbe: Send + Sync {
    /// True while the host context may be safely called into
    fn is_alive(&self) -> bool;
}

/// Probe that always reports the host as alive
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysAlive;

impl HostProbe for AlwaysAlive {
    fn is_alive(&self) -> bool {
        true
    }
}

/// Data-only description of the operation a callback belongs to
///
/// Deliberately holds no references into the host or the pool: just an
/// operation label and plain JSON fields, so contexts stay valid no matter
/// what the host has reloaded or freed in the meantime.
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// What the task was doing (e.g. "download_photo")
    pub operation: String,
    /// Plain-data parameters of the operation
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl CallbackContext {
    /// Create a context for a named operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Attach a data field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Read a field back
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// Callback fired on task progress updates
pub trait OnProgress: Send + Sync {
    /// Invoked with the operation context and a task snapshot
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot);
}

impl<F: Fn(&CallbackContext, &TaskSnapshot) + Send + Sync> OnProgress for F {
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot) {
        self(ctx, task)
    }
}

/// Callback fired once when a task completes successfully
pub trait OnComplete: Send + Sync {
    /// Invoked with the operation context and the final task snapshot
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot);
}

impl<F: Fn(&CallbackContext, &TaskSnapshot) + Send + Sync> OnComplete for F {
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot) {
        self(ctx, task)
    }
}

/// Callback fired once when a task fails
pub trait OnError: Send + Sync {
    /// Invoked with the operation context and the final task snapshot
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot);
}

impl<F: Fn(&CallbackContext, &TaskSnapshot) + Send + Sync> OnError for F {
    fn call(&self, ctx: &CallbackContext, task: &TaskSnapshot) {
        self(ctx, task)
    }
}

type HostJob = Box<dyn FnOnce() + Send>;

/// Create a dispatcher/pump pair bound to a host probe
pub fn host_channel(probe: Arc<dyn HostProbe>) -> (CallbackDispatcher, HostPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CallbackDispatcher { tx }, HostPump { rx, probe })
}

/// Worker-side handle: enqueues callbacks for the host to run
///
/// Cheap to clone; sends never block. If the host has dropped its pump the
/// callback is discarded silently (shutdown race, not an error).
#[derive(Clone)]
pub struct CallbackDispatcher {
    tx: mpsc::UnboundedSender<HostJob>,
}

impl CallbackDispatcher {
    /// Queue a closure to run on the host's thread
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::debug!("Host pump dropped, discarding callback");
        }
    }

    /// Number of receivers still attached (0 or 1)
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Host-side handle: drains queued callbacks on the caller's thread
pub struct HostPump {
    rx: mpsc::UnboundedReceiver<HostJob>,
    probe: Arc<dyn HostProbe>,
}

impl HostPump {
    /// Run up to `max` queued callbacks on the calling thread
    ///
    /// Returns the number actually executed. The probe is re-checked before
    /// each callback; a dead host drops the remaining batch's callbacks one
    /// by one without running them. Panics inside callbacks are caught and
    /// logged.
    pub fn pump(&mut self, max: usize) -> usize {
        let mut executed = 0;
        for _ in 0..max {
            let Ok(job) = self.rx.try_recv() else {
                break;
            };

            if !self.probe.is_alive() {
                tracing::debug!("Host context gone, skipping callback");
                continue;
            }

            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("Host callback panicked");
            }
            executed += 1;
        }
        executed
    }

    /// Number of callbacks waiting to be pumped
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl std::fmt::Debug for HostPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPump")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ToggleProbe(AtomicBool);

    impl HostProbe for ToggleProbe {
        fn is_alive(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn dispatched_jobs_run_on_the_pumping_thread() {
        let (dispatcher, mut pump) = host_channel(Arc::new(AlwaysAlive));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            dispatcher.dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(pump.pending(), 3);
        assert_eq!(pump.pump(10), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(pump.pump(10), 0, "queue is drained");
    }

    #[test]
    fn pump_respects_the_batch_limit() {
        let (dispatcher, mut pump) = host_channel(Arc::new(AlwaysAlive));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..25 {
            let count = count.clone();
            dispatcher.dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(pump.pump(10), 10);
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(pump.pending(), 15, "rest stays queued for the next tick");
    }

    #[test]
    fn dead_host_skips_callbacks_without_running_them() {
        let probe = Arc::new(ToggleProbe(AtomicBool::new(true)));
        let (dispatcher, mut pump) = host_channel(probe.clone());
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let count = count.clone();
            dispatcher.dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        probe.0.store(false, Ordering::SeqCst);
        assert_eq!(pump.pump(10), 0, "nothing executes against a dead host");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(pump.pending(), 0, "skipped callbacks are discarded");
    }

    #[test]
    fn panicking_callback_does_not_stop_the_batch() {
        let (dispatcher, mut pump) = host_channel(Arc::new(AlwaysAlive));
        let count = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(|| panic!("callback bug"));
        let count_clone = count.clone();
        dispatcher.dispatch(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // The panicking job still counts as executed
        assert_eq!(pump.pump(10), 2);
        assert_eq!(
            count.load(Ordering::SeqCst),
            1,
            "callback after the panic still ran"
        );
    }

    #[test]
    fn dispatch_after_pump_dropped_is_silent() {
        let (dispatcher, pump) = host_channel(Arc::new(AlwaysAlive));
        drop(pump);

        assert!(!dispatcher.is_connected());
        // Must not panic or block
        dispatcher.dispatch(|| {});
    }

    #[test]
    fn context_builder_holds_plain_data() {
        let ctx = CallbackContext::new("download_photo")
            .with_field("photo_id", 12345)
            .with_field("size", "large");

        assert_eq!(ctx.operation, "download_photo");
        assert_eq!(ctx.field("photo_id").unwrap(), 12345);
        assert_eq!(ctx.field("size").unwrap(), "large");
        assert!(ctx.field("missing").is_none());
    }

    #[test]
    fn closures_satisfy_the_callback_traits() {
        fn takes_on_complete(_cb: &dyn OnComplete) {}
        fn takes_on_error(_cb: &dyn OnError) {}
        fn takes_on_progress(_cb: &dyn OnProgress) {}

        let closure = |_ctx: &CallbackContext, _task: &TaskSnapshot| {};
        takes_on_complete(&closure);
        takes_on_error(&closure);
        takes_on_progress(&closure);
    }
}
