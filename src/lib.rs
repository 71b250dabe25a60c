//! # offthread
//!
//! Background task engine for single-threaded hosts: a prioritized worker
//! pool with cooperative cancellation, callback marshaling back to the
//! host's thread, retrying HTTP fetches with connectivity awareness, a
//! two-tier (memory + disk) content cache, and progress tracking with
//! moving-average ETAs.
//!
//! ## Design Philosophy
//!
//! offthread is designed to be:
//! - **Host-safe** - Callbacks only ever run when the host pumps them on
//!   its own thread, and never against a dead host context
//! - **Cooperative** - Cancellation is a token tasks observe at their own
//!   safe points, never a forced abort
//! - **Fault-isolated** - A panicking task or callback is contained and
//!   logged; workers and other tasks keep running
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use offthread::{
//!     AlwaysAlive, AlwaysOnline, CallbackContext, Config, Fetcher, TaskSpec, WorkerPool,
//!     host_channel,
//! };
//! use futures::FutureExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (dispatcher, mut pump) = host_channel(Arc::new(AlwaysAlive));
//!     let pool = WorkerPool::new(config.workers.clone(), dispatcher)?;
//!     let fetcher = Arc::new(Fetcher::new(
//!         config.network,
//!         config.retry,
//!         Arc::new(AlwaysOnline),
//!     )?);
//!
//!     let spec = TaskSpec::new(CallbackContext::new("fetch_photo").with_field("id", 42))
//!         .on_complete(|ctx: &CallbackContext, task: &offthread::TaskSnapshot| {
//!             println!("{} finished: {:?}", ctx.operation, task.status);
//!         });
//!
//!     pool.submit(spec, move |handle| {
//!         let fetcher = fetcher.clone();
//!         async move {
//!             let token = handle.cancellation_token().clone();
//!             let response = fetcher
//!                 .fetch("https://example.com/photo.jpg", &[], &token, None)
//!                 .await?;
//!             Ok(serde_json::json!({ "bytes": response.body.len() }))
//!         }
//!         .boxed()
//!     })?;
//!
//!     // On the host's own thread, once per tick:
//!     pump.pump(10);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Two-tier content cache (memory LRU + disk with persisted index)
pub mod cache;
/// Configuration types
pub mod config;
/// Callback marshaling to the host thread
pub mod dispatch;
/// Error types
pub mod error;
/// HTTP fetching with connectivity checks and retries
pub mod fetch;
/// Prioritized worker pool with cooperative cancellation
pub mod pool;
/// Operation progress tracking with moving-average ETAs
pub mod progress;
/// Retry classification, exponential backoff, cancellable sleep
pub mod retry;
/// Core task types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStats, QueryCache, QueryKey, TwoTierCache};
pub use config::{CacheConfig, Config, NetworkConfig, RetentionPolicy, RetryConfig, WorkerConfig};
pub use dispatch::{
    AlwaysAlive, CallbackContext, CallbackDispatcher, HostProbe, HostPump, OnComplete, OnError,
    OnProgress, host_channel,
};
pub use error::{Error, Result};
pub use fetch::{AlwaysOnline, FetchResponse, Fetcher, NetworkGate, NetworkStatus};
pub use pool::{TaskFuture, TaskHandle, TaskSpec, WorkerPool};
pub use progress::{ProgressState, ProgressStatus, ProgressTracker};
pub use types::{TaskId, TaskOutput, TaskPriority, TaskSnapshot, TaskStats, TaskStatus};
