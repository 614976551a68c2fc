use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use crate::config::RateLimitConfig;
use crate::error::{Result, ScrapeError};

pub const USER_AGENT_HEADER: &str = "User-Agent";

// ============================================================================
// RATE CLASSES
// ============================================================================

/// Category of outbound call, each with its own queue and spacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateClass {
    Standard,
    Intensive,
    BulkQuery,
}

impl RateClass {
    pub const ALL: [RateClass; 3] =
        [RateClass::Standard, RateClass::Intensive, RateClass::BulkQuery];

    fn index(self) -> usize {
        match self {
            RateClass::Standard => 0,
            RateClass::Intensive => 1,
            RateClass::BulkQuery => 2,
        }
    }

    fn interval(self, config: &RateLimitConfig) -> Duration {
        let ms = match self {
            RateClass::Standard => config.standard_interval_ms,
            RateClass::Intensive => config.intensive_interval_ms,
            RateClass::BulkQuery => config.bulk_query_interval_ms,
        };
        Duration::from_millis(ms)
    }
}

impl fmt::Display for RateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RateClass::Standard => "standard",
            RateClass::Intensive => "intensive",
            RateClass::BulkQuery => "bulk-query",
        };
        f.write_str(label)
    }
}

// ============================================================================
// REQUESTS & TRANSPORT
// ============================================================================

/// A GET against the API: endpoint, query parameters and headers
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(url: impl Into<String>) -> ApiRequest {
        ApiRequest {
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> ApiRequest {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// Sets a header, replacing any earlier value under the same name
    pub fn header(mut self, name: &str, value: &str) -> ApiRequest {
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Human-readable form for log lines
    pub fn describe(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, query)
    }
}

/// Error code MediaWiki puts in a 200 body when it throttles a client
const RATELIMITED_CODE: &str = "ratelimited";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> ApiResponse {
        ApiResponse { status: 200, body: body.into() }
    }

    /// HTTP 429, or a 200 whose error envelope says `ratelimited`
    pub fn is_throttled(&self) -> bool {
        self.status == 429
            || (self.is_success()
                && self.body.contains(RATELIMITED_CODE)
                && self.error_code().as_deref() == Some(RATELIMITED_CODE))
    }

    fn error_code(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.get("error")?.get("code")?.as_str().map(str::to_string)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request; swapped for a mock in tests
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<ApiResponse>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<ApiResponse>> + Send {
        (**self).send(request, timeout)
    }
}

/// reqwest-backed transport used outside of tests
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .gzip(true)
            .build()
            .map_err(|e| ScrapeError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, timeout: Duration) -> Result<ApiResponse> {
        let mut builder = self.client.get(&request.url).query(&request.params).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ScrapeError::Timeout { url: request.describe(), timeout }
            } else {
                ScrapeError::Transport { url: request.describe(), message: e.to_string() }
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;
        Ok(ApiResponse { status, body })
    }
}

// ============================================================================
// GOVERNOR
// ============================================================================

/// One queue per rate class. Holding the lock is the single in-flight slot,
/// the stored instant is when the last request of the class went out.
struct Lane {
    interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

/// Funnels every outbound call through a per-class queue with minimum spacing,
/// and retries throttled calls with exponential backoff.
pub struct Governor<T> {
    transport: T,
    lanes: [Lane; 3],
    user_agent: String,
    max_retries: u32,
    base_backoff: Duration,
    request_timeout: Duration,
}

impl<T: Transport> Governor<T> {
    pub fn new(transport: T, config: &RateLimitConfig, user_agent: impl Into<String>) -> Self {
        let lane = |class: RateClass| Lane {
            interval: class.interval(config),
            last_sent: Mutex::new(None),
        };
        Self {
            transport,
            lanes: RateClass::ALL.map(lane),
            user_agent: user_agent.into(),
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn interval(&self, class: RateClass) -> Duration {
        self.lanes[class.index()].interval
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wait before retry `attempt` (1-based): `base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }

    /// Sends `request` in its class's queue. Throttling is retried here,
    /// every other failure goes straight back to the caller.
    pub async fn execute(&self, request: ApiRequest, class: RateClass) -> Result<ApiResponse> {
        let lane = &self.lanes[class.index()];
        let request = request.header(USER_AGENT_HEADER, &self.user_agent);
        let mut last_sent = lane.last_sent.lock().await;
        let mut retries = 0;

        loop {
            if let Some(previous) = *last_sent {
                sleep_until(previous + lane.interval).await;
            }
            *last_sent = Some(Instant::now());

            let sent = self.transport.send(&request, self.request_timeout);
            let response = match timeout(self.request_timeout, sent).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    log::error!("{} request failed: {} ({})", class, e, request.describe());
                    return Err(e);
                }
                Err(_) => {
                    log::error!(
                        "{} request timed out after {:?} ({})",
                        class,
                        self.request_timeout,
                        request.describe()
                    );
                    return Err(ScrapeError::Timeout {
                        url: request.describe(),
                        timeout: self.request_timeout,
                    });
                }
            };

            if !response.is_throttled() {
                if !response.is_success() {
                    log::error!(
                        "{} request returned HTTP {} ({})",
                        class,
                        response.status,
                        request.describe()
                    );
                    return Err(ScrapeError::Status {
                        url: request.describe(),
                        status: response.status,
                    });
                }
                return Ok(response);
            }

            if retries >= self.max_retries {
                log::warn!(
                    "Giving up on {} request after {} throttled retries ({})",
                    class,
                    retries,
                    request.describe()
                );
                return Err(ScrapeError::RateLimitExceeded { class, retries });
            }

            retries += 1;
            let delay = self.backoff(retries);
            log::warn!(
                "Throttled on {} request, retry {}/{} in {:?} ({})",
                class,
                retries,
                self.max_retries,
                delay,
                request.describe()
            );
            sleep(delay).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted statuses and records when each call arrived
    struct ScriptedTransport {
        statuses: StdMutex<VecDeque<u16>>,
        body: String,
        calls: StdMutex<Vec<(Instant, ApiRequest)>>,
        stall: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(statuses: &[u16]) -> Arc<Self> {
            Self::with_body(statuses, "{}")
        }

        fn with_body(statuses: &[u16], body: &str) -> Arc<Self> {
            Arc::new(Self {
                statuses: StdMutex::new(statuses.iter().copied().collect()),
                body: body.to_string(),
                calls: StdMutex::new(Vec::new()),
                stall: None,
            })
        }

        fn stalling(stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                statuses: StdMutex::new(VecDeque::new()),
                body: "{}".to_string(),
                calls: StdMutex::new(Vec::new()),
                stall: Some(stall),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&self, request: &ApiRequest, _timeout: Duration) -> Result<ApiResponse> {
            self.calls.lock().unwrap().push((Instant::now(), request.clone()));
            if let Some(stall) = self.stall {
                sleep(stall).await;
            }
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            Ok(ApiResponse { status, body: self.body.clone() })
        }
    }

    fn config(interval_ms: u64, base_backoff_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            standard_interval_ms: interval_ms,
            intensive_interval_ms: interval_ms * 3,
            bulk_query_interval_ms: interval_ms,
            max_retries: 3,
            base_backoff_ms,
            request_timeout_secs: 20,
        }
    }

    fn request() -> ApiRequest {
        ApiRequest::new("https://wiki.test/api.php").param("action", "query")
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_in_one_class_are_spaced() {
        let transport = ScriptedTransport::new(&[]);
        let governor = Governor::new(transport.clone(), &config(2_000, 1_000), "test-agent");

        let (a, b, c, d) = tokio::join!(
            governor.execute(request(), RateClass::Standard),
            governor.execute(request(), RateClass::Standard),
            governor.execute(request(), RateClass::Standard),
            governor.execute(request(), RateClass::Standard),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());

        let times = transport.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(2_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_do_not_share_a_queue() {
        let transport = ScriptedTransport::new(&[]);
        let governor = Governor::new(transport.clone(), &config(2_000, 1_000), "test-agent");
        let start = Instant::now();

        let _ = tokio::join!(
            governor.execute(request(), RateClass::Standard),
            governor.execute(request(), RateClass::Intensive),
            governor.execute(request(), RateClass::BulkQuery),
        );

        for at in transport.call_times() {
            assert_eq!(at, start);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_retries_three_times_with_doubling_delay() {
        let transport = ScriptedTransport::new(&[429, 429, 429, 429, 200]);
        let governor = Governor::new(transport.clone(), &config(0, 1_000), "test-agent");

        let err = governor.execute(request(), RateClass::BulkQuery).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::RateLimitExceeded { class: RateClass::BulkQuery, retries: 3 }
        ));

        let times = transport.call_times();
        assert_eq!(times.len(), 4, "one attempt plus exactly three retries");
        let gaps: Vec<Duration> = times.windows(2).map(|p| p[1] - p[0]).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_throttling_stops() {
        let transport = ScriptedTransport::new(&[429, 200]);
        let governor = Governor::new(transport.clone(), &config(0, 1_000), "test-agent");

        let response = governor.execute(request(), RateClass::Standard).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratelimited_error_body_counts_as_throttling() {
        let body = r#"{"error":{"code":"ratelimited","info":"You've exceeded your rate limit."}}"#;
        let transport = ScriptedTransport::with_body(&[], body);
        let governor = Governor::new(transport.clone(), &config(0, 1_000), "test-agent");

        let err = governor.execute(request(), RateClass::Standard).await.unwrap_err();
        assert!(err.is_throttled());
        assert!(matches!(
            err,
            ScrapeError::RateLimitExceeded { class: RateClass::Standard, retries: 3 }
        ));
        assert_eq!(transport.call_times().len(), 4);
    }

    #[test]
    fn test_other_error_bodies_are_not_throttling() {
        let missing = ApiResponse::ok(r#"{"error":{"code":"missingtitle"}}"#);
        assert!(!missing.is_throttled());
        let mentions = ApiResponse::ok(r#"{"parse":{"wikitext":"ratelimited"}}"#);
        assert!(!mentions.is_throttled());
        assert!(ApiResponse { status: 429, body: String::new() }.is_throttled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_not_retried() {
        let transport = ScriptedTransport::new(&[503, 200]);
        let governor = Governor::new(transport.clone(), &config(0, 1_000), "test-agent");

        let err = governor.execute(request(), RateClass::Standard).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 503, .. }));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_times_out_and_frees_queue() {
        let transport = ScriptedTransport::stalling(Duration::from_secs(3_600));
        let governor = Governor::new(transport.clone(), &config(0, 1_000), "test-agent");

        let err = governor.execute(request(), RateClass::Intensive).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout { .. }));

        let err = governor.execute(request(), RateClass::Intensive).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout { .. }));
        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test]
    async fn test_every_request_carries_user_agent() {
        let transport = ScriptedTransport::new(&[]);
        let governor = Governor::new(transport.clone(), &config(0, 0), "test-agent/1.0");

        governor.execute(request(), RateClass::Standard).await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].1.get_header("user-agent"), Some("test-agent/1.0"));
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let governor = Governor::new(ScriptedTransport::new(&[]), &config(0, 2_000), "test-agent");
        assert_eq!(governor.backoff(1), Duration::from_secs(4));
        assert_eq!(governor.backoff(2), Duration::from_secs(8));
        assert_eq!(governor.backoff(3), Duration::from_secs(16));
    }
}
