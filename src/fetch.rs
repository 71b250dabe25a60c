//! Connectivity-gated, retrying HTTP fetch
//!
//! Every fetch goes through three gates before the first attempt:
//! the host's network policy ([`NetworkGate`]), a cached connectivity probe,
//! and the caller's cancellation token. None of these consume a retry.
//! Attempts then loop with exponential backoff; the sleep between attempts
//! selects on the cancellation token so cancellation aborts promptly.

use crate::config::{NetworkConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, backoff_delay, sleep_cancellable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Host policy seam: is outbound network access allowed at all?
///
/// GUI hosts often expose a global "allow online access" switch; the
/// embedder implements this trait against it. A disabled gate fails fetches
/// immediately with [`Error::NetworkDisabled`], before any socket is opened.
pub trait NetworkGate: Send + Sync {
    /// True when the host permits outbound network access
    fn online_access_enabled(&self) -> bool;
}

/// Gate that always allows network access
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl NetworkGate for AlwaysOnline {
    fn online_access_enabled(&self) -> bool {
        true
    }
}

/// Result of the most recent connectivity probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    /// At least one probe endpoint accepted a connection
    Online,
    /// All probe endpoints were unreachable
    Offline,
    /// No probe has run yet
    Unknown,
}

/// Response from a successful fetch
#[derive(Clone, Debug)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers (last value wins for repeated names)
    pub headers: HashMap<String, String>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Deserialize the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Callback invoked as attempts progress: `(attempt_number, message)`
pub type AttemptObserver<'a> = &'a (dyn Fn(u32, &str) + Send + Sync);

struct ProbeState {
    status: NetworkStatus,
    checked_at: Option<Instant>,
}

/// HTTP fetcher with connectivity gating, retry, and cancellation
pub struct Fetcher {
    client: reqwest::Client,
    network: NetworkConfig,
    retry: RetryConfig,
    gate: Arc<dyn NetworkGate>,
    probe: Mutex<ProbeState>,
}

impl Fetcher {
    /// Create a fetcher with the given configuration and host gate
    pub fn new(
        network: NetworkConfig,
        retry: RetryConfig,
        gate: Arc<dyn NetworkGate>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(network.request_timeout)
            .user_agent(network.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            network,
            retry,
            gate,
            probe: Mutex::new(ProbeState {
                status: NetworkStatus::Unknown,
                checked_at: None,
            }),
        })
    }

    /// Probe connectivity, reusing a recent result unless `force` is set
    ///
    /// Tries a plain TCP connect to each configured probe endpoint; the
    /// first success means online. Results are cached for the configured
    /// interval so hot paths do not probe repeatedly.
    pub async fn check_connectivity(&self, force: bool) -> NetworkStatus {
        let mut probe = self.probe.lock().await;

        if !force {
            if let Some(checked_at) = probe.checked_at {
                if checked_at.elapsed() < self.network.connectivity_check_interval
                    && probe.status != NetworkStatus::Unknown
                {
                    return probe.status;
                }
            }
        }

        let mut status = NetworkStatus::Offline;
        for host in &self.network.probe_hosts {
            match tokio::time::timeout(
                self.network.connectivity_check_timeout,
                TcpStream::connect(host.as_str()),
            )
            .await
            {
                Ok(Ok(_)) => {
                    status = NetworkStatus::Online;
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(host, error = %e, "Connectivity probe failed");
                }
                Err(_) => {
                    tracing::debug!(host, "Connectivity probe timed out");
                }
            }
        }

        if status == NetworkStatus::Offline {
            tracing::warn!("All connectivity probes failed, treating as offline");
        }

        probe.status = status;
        probe.checked_at = Some(Instant::now());
        status
    }

    /// Fetch a URL with retry, returning the response on first success
    ///
    /// `on_progress` receives attempt-level updates ("Fetching (attempt
    /// 2/4)", "Retrying in 2.3s"). Cancellation is honored between attempts
    /// and during backoff sleeps; an in-flight request runs to its timeout.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
        on_progress: Option<AttemptObserver<'_>>,
    ) -> Result<FetchResponse> {
        if !self.gate.online_access_enabled() {
            tracing::debug!(url, "Fetch refused: network disabled by host");
            return Err(Error::NetworkDisabled);
        }

        if self.check_connectivity(false).await != NetworkStatus::Online {
            return Err(Error::Connectivity(
                "connectivity probe found no reachable endpoint".into(),
            ));
        }

        let max_attempts = self.retry.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if let Some(observer) = on_progress {
                observer(
                    attempt + 1,
                    &format!("Fetching (attempt {}/{})", attempt + 1, max_attempts),
                );
            }

            let error = match self.attempt(url, headers).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(url, attempts = attempt + 1, "Fetch succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retryable = match &error {
                Error::RateLimited { .. } => true,
                Error::RemoteService { status, .. } => {
                    self.retry.retryable_status_codes.contains(status)
                }
                other => other.is_retryable(),
            };

            if !retryable {
                tracing::warn!(url, error = %error, "Fetch failed with non-retryable error");
                return Err(error);
            }

            tracing::warn!(
                url,
                error = %error,
                attempt = attempt + 1,
                max_attempts,
                "Fetch attempt failed"
            );
            last_error = Some(error);

            if attempt + 1 < max_attempts {
                let delay = backoff_delay(attempt, &self.retry);
                if let Some(observer) = on_progress {
                    observer(
                        attempt + 1,
                        &format!("Retrying in {:.1}s", delay.as_secs_f64()),
                    );
                }
                sleep_cancellable(delay, cancel).await?;
            }
        }

        // Loop runs at least once, so last_error is always set here
        Err(last_error.unwrap_or_else(|| Error::Other("fetch produced no attempts".into())))
    }

    /// Fetch a URL and deserialize the response body as JSON
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
        on_progress: Option<AttemptObserver<'_>>,
    ) -> Result<T> {
        let response = self.fetch(url, headers, cancel, on_progress).await?;
        response.json()
    }

    /// Run a single request and classify the outcome
    async fn attempt(&self, url: &str, headers: &[(String, String)]) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    seconds: self.network.request_timeout.as_secs(),
                }
            } else {
                Error::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        let header_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        if status == 429 {
            return Err(Error::RateLimited {
                reset_at: rate_limit_reset(&header_map),
            });
        }

        if !(200..300).contains(&status) {
            let reason = response
                .status()
                .canonical_reason()
                .unwrap_or("unknown")
                .to_string();
            return Err(Error::RemoteService { status, reason });
        }

        let body = response.bytes().await?.to_vec();
        Ok(FetchResponse {
            status,
            headers: header_map,
            body,
        })
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("network", &self.network)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Extract a rate-limit reset timestamp from response headers
///
/// `Retry-After` carries delta seconds; `X-Ratelimit-Reset` carries an
/// absolute Unix timestamp. Both are normalized to an absolute timestamp.
fn rate_limit_reset(headers: &HashMap<String, String>) -> Option<i64> {
    if let Some(delta) = headers
        .get("retry-after")
        .and_then(|v| v.parse::<i64>().ok())
    {
        return Some(chrono::Utc::now().timestamp() + delta);
    }
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct ToggleGate(AtomicBool);

    impl NetworkGate for ToggleGate {
        fn online_access_enabled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_base: 2.0,
            jitter: 0.0,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }

    /// Fetcher whose connectivity probe targets the mock server itself
    fn fetcher_for(server: &MockServer, retry: RetryConfig) -> Fetcher {
        let network = NetworkConfig {
            probe_hosts: vec![server.address().to_string()],
            connectivity_check_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Fetcher::new(network, retry, Arc::new(AlwaysOnline)).unwrap()
    }

    #[tokio::test]
    async fn successful_fetch_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"hello".to_vec())
                    .insert_header("x-custom", "yes"),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let response = fetcher
            .fetch(&format!("{}/data", server.uri()), &[], &cancel, None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert_eq!(response.headers.get("x-custom").unwrap(), "yes");
    }

    #[tokio::test]
    async fn transient_server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let response = fetcher
            .fetch(&format!("{}/flaky", server.uri()), &[], &cancel, None)
            .await
            .unwrap();

        assert_eq!(response.body, b"recovered");
    }

    #[tokio::test]
    async fn client_errors_fail_immediately_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteService { status: 404, .. }));
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // initial + 3 retries
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch(&format!("{}/down", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteService { status: 500, .. }));
    }

    #[tokio::test]
    async fn rate_limit_carries_reset_hint_from_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
            .mount(&server)
            .await;

        let retry = RetryConfig {
            max_retries: 0,
            ..fast_retry()
        };
        let fetcher = fetcher_for(&server, retry);
        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch(&format!("{}/limited", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();

        let now = chrono::Utc::now().timestamp();
        match err {
            Error::RateLimited { reset_at: Some(t) } => {
                assert!(
                    (t - now - 120).abs() <= 5,
                    "reset hint should be ~120s from now, was {} (now {now})",
                    t
                );
            }
            other => panic!("expected RateLimited with hint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_gate_short_circuits_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let network = NetworkConfig {
            probe_hosts: vec![server.address().to_string()],
            ..Default::default()
        };
        let gate = Arc::new(ToggleGate(AtomicBool::new(false)));
        let fetcher = Fetcher::new(network, fast_retry(), gate).unwrap();

        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch(&format!("{}/any", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NetworkDisabled));
    }

    #[tokio::test]
    async fn offline_probe_short_circuits_without_consuming_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        // Probe host that nothing listens on
        let network = NetworkConfig {
            probe_hosts: vec!["127.0.0.1:1".to_string()],
            connectivity_check_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let fetcher = Fetcher::new(network, fast_retry(), Arc::new(AlwaysOnline)).unwrap();

        let cancel = CancellationToken::new();
        let err = fetcher
            .fetch(&format!("{}/any", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }

    #[tokio::test]
    async fn probe_result_is_cached_within_interval() {
        // TEST-NET address: a real probe against it never reports Online
        let network = NetworkConfig {
            probe_hosts: vec!["192.0.2.1:1".to_string()],
            connectivity_check_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let fetcher = Fetcher::new(network, fast_retry(), Arc::new(AlwaysOnline)).unwrap();

        // Seed a fresh Online result as if a probe just succeeded
        {
            let mut probe = fetcher.probe.lock().await;
            probe.status = NetworkStatus::Online;
            probe.checked_at = Some(Instant::now());
        }

        assert_eq!(
            fetcher.check_connectivity(false).await,
            NetworkStatus::Online,
            "recent probe result should be reused within the interval"
        );
        assert_eq!(
            fetcher.check_connectivity(true).await,
            NetworkStatus::Offline,
            "forced probe must re-check"
        );
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts_promptly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow-fail"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let retry = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            ..fast_retry()
        };
        let fetcher = fetcher_for(&server, retry);

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            child.cancel();
        });

        let start = Instant::now();
        let err = fetcher
            .fetch(&format!("{}/slow-fail", server.uri()), &[], &cancel, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "cancel must abort the 30s backoff, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn progress_observer_sees_attempts_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/once"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/once"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let messages = std::sync::Mutex::new(Vec::<String>::new());
        let observer = |_attempt: u32, message: &str| {
            messages.lock().unwrap().push(message.to_string());
        };

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        fetcher
            .fetch(
                &format!("{}/once", server.uri()),
                &[],
                &cancel,
                Some(&observer),
            )
            .await
            .unwrap();

        let messages = messages.into_inner().unwrap();
        assert!(messages.iter().any(|m| m.contains("attempt 1/4")));
        assert!(messages.iter().any(|m| m.starts_with("Retrying in")));
        assert!(messages.iter().any(|m| m.contains("attempt 2/4")));
    }

    #[tokio::test]
    async fn fetch_json_deserializes_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"total": 3}"#))
            .mount(&server)
            .await;

        #[derive(serde::Deserialize)]
        struct Payload {
            total: u32,
        }

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let payload: Payload = fetcher
            .fetch_json(&format!("{}/json", server.uri()), &[], &cancel, None)
            .await
            .unwrap();
        assert_eq!(payload.total, 3);
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(wiremock::matchers::header("authorization", "key-123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, fast_retry());
        let cancel = CancellationToken::new();
        let headers = vec![("authorization".to_string(), "key-123".to_string())];
        fetcher
            .fetch(&format!("{}/auth", server.uri()), &headers, &cancel, None)
            .await
            .unwrap();
    }
}
