//! Retry building blocks: error classification, backoff, cancellable sleep
//!
//! The fetch layer drives its own attempt loop (it has to interleave
//! connectivity checks and cancellation between attempts); this module
//! provides the pieces it is built from.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, rate limiting) should return `true`.
/// Permanent failures (bad configuration, missing resources, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport-level problems are worth another attempt
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout { .. } => true,
            Error::Connectivity(_) => true,
            Error::RateLimited { .. } => true,
            // Server-side statuses: only the transient ones
            Error::RemoteService { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Cancellation must never be retried
            Error::Cancelled => false,
            // Policy says no network; retrying will not change that
            Error::NetworkDisabled => false,
            // Cache failures degrade to misses, retrying the fetch is a separate concern
            Error::CacheIo(_) => false,
            // Permanent
            Error::Config { .. } => false,
            Error::ShuttingDown => false,
            Error::NotFound(_) => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Compute the backoff delay for a retry attempt
///
/// `attempt` is zero-based: the delay before the first retry uses `attempt = 0`.
/// The pre-jitter delay is `base_delay * backoff_base^attempt`, capped at
/// `max_delay`. Symmetric jitter of ±`jitter` fraction is then applied so
/// simultaneous clients spread out.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config.backoff_base.powi(attempt as i32);
    let raw = config.base_delay.as_secs_f64() * exp;
    let capped = raw.min(config.max_delay.as_secs_f64());

    let jittered = if config.jitter > 0.0 {
        let mut rng = rand::thread_rng();
        let factor: f64 = rng.gen_range(-config.jitter..=config.jitter);
        (capped * (1.0 + factor)).max(0.0)
    } else {
        capped
    };

    Duration::from_secs_f64(jittered)
}

/// Sleep that aborts promptly when the token is cancelled
///
/// Returns `Err(Error::Cancelled)` if the token fires before the duration elapses.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> crate::error::Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
