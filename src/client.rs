//! Retrying HTTP client shared by every network-bound step of a run.
//!
//! ## Retry Strategy
//!
//! Conversion services (GROBID and friends) sit behind load balancers that
//! answer 502/503/504 under bursty load, and connections get reset when a
//! service restarts. Both are transient. Each attempt that fails that way is
//! retried after an exponential backoff of `backoff_factor * 2^(retry - 1)`
//! seconds: with the default factor of 0.1 the waits are 0.1 s → 0.2 s →
//! 0.4 s …, capped at [`MAX_BACKOFF`].
//!
//! POST is retried too. Callers always send a whole document and the
//! services are side-effect free per document, so re-submitting is safe.
//!
//! Intermediate failures are only logged; the caller sees either the final
//! response or a single [`NetworkError`].
//!
//! ## Lifetime
//!
//! [`RetryClient`] owns a `reqwest` connection pool. Clones share the pool;
//! it is torn down when the last clone is dropped, which the runners do
//! explicitly at the end of a run.

use crate::error::{NetworkError, PipelineError};
use reqwest::{Method, StatusCode};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Idempotent methods plus POST.
pub const METHODS_WITH_POST: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "PUT", "TRACE", "POST"];

/// Gateway-style statuses worth another attempt.
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[500, 502, 503, 504];

/// When and how often to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 10.
    pub max_retries: u32,
    /// Backoff factor in seconds. Default: 0.1.
    pub backoff_factor: f64,
    /// Methods eligible for retry. Default: [`METHODS_WITH_POST`].
    pub methods: HashSet<Method>,
    /// Statuses that count as transient. Default: [`DEFAULT_RETRY_STATUSES`].
    pub statuses: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_factor: 0.1,
            methods: METHODS_WITH_POST
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
                .collect(),
            statuses: DEFAULT_RETRY_STATUSES.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor: backoff_factor.max(0.0),
            ..Default::default()
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let secs = self.backoff_factor * 2f64.powi(retry.saturating_sub(1).min(30) as i32);
        Duration::from_secs_f64(secs).min(MAX_BACKOFF)
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    pub fn is_retry_status(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status.as_u16())
    }
}

/// Outcome of a single attempt inside [`retry_with_backoff`].
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth another try.
    Transient(E),
    /// Give up immediately.
    Permanent(E),
}

/// The last error seen, and how many attempts were made.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `attempt` until it succeeds, fails permanently, or `max_retries`
/// retries have been spent. `attempt` receives the 0-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: F,
) -> Result<T, RetryExhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    let mut n = 0u32;
    loop {
        if n > 0 {
            let backoff = policy.backoff(n);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                n,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(error)) => {
                return Err(RetryExhausted {
                    error,
                    attempts: n + 1,
                })
            }
            Err(AttemptError::Transient(error)) => {
                if n >= policy.max_retries {
                    return Err(RetryExhausted {
                        error,
                        attempts: n + 1,
                    });
                }
                debug!("{}: attempt {} failed: {}", label, n + 1, error);
            }
        }
        n += 1;
    }
}

/// Request payload. Kept as owned data so it can be re-sent on every attempt.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// Single-file multipart upload.
    Multipart {
        field: String,
        file_name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
}

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ServiceResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// `reqwest` client plus retry policy. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RetryClient {
    http: reqwest::Client,
    policy: Arc<RetryPolicy>,
    default_timeout: Duration,
}

impl RetryClient {
    pub fn new(policy: RetryPolicy, default_timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            policy: Arc::new(policy),
            default_timeout,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issue `method url` with `body`, retrying transient failures.
    ///
    /// `timeout` bounds each attempt; `None` uses the client default.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse, NetworkError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let retryable = self.policy.allows_method(&method);
        let label = format!("{method} {url}");

        let result = retry_with_backoff(&self.policy, &label, |_| {
            let method = method.clone();
            let body = body.clone();
            async move {
                let classify = |e: AttemptFailure| {
                    if retryable && e.transient {
                        AttemptError::Transient(e)
                    } else {
                        AttemptError::Permanent(e)
                    }
                };
                self.attempt(method, url, body, timeout).await.map_err(classify)
            }
        })
        .await;

        result.map_err(|exhausted| {
            let attempts = exhausted.attempts;
            match exhausted.error.kind {
                FailureKind::Status(status) => NetworkError::Status {
                    url: url.to_string(),
                    status,
                    attempts,
                },
                FailureKind::Transport(detail) => NetworkError::Transport {
                    url: url.to_string(),
                    attempts,
                    detail,
                },
                FailureKind::Invalid(detail) => NetworkError::InvalidRequest(detail),
            }
        })
    }

    /// POST `data` and return the response body, treating non-2xx as failure.
    pub async fn post_bytes(
        &self,
        url: &str,
        data: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse, NetworkError> {
        self.request(Method::POST, url, RequestBody::Bytes(data), timeout)
            .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
        timeout: Duration,
    ) -> Result<ServiceResponse, AttemptFailure> {
        let mut builder = self.http.request(method, url).timeout(timeout);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(data) => builder.body(data),
            RequestBody::Multipart {
                field,
                file_name,
                mime_type,
                data,
            } => {
                let mut part = reqwest::multipart::Part::bytes(data).file_name(file_name);
                if let Some(mime) = mime_type {
                    part = part
                        .mime_str(&mime)
                        .map_err(|e| AttemptFailure::invalid(e.to_string()))?;
                }
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().await.map_err(AttemptFailure::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure {
                transient: self.policy.is_retry_status(status),
                kind: FailureKind::Status(status.as_u16()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        Ok(ServiceResponse {
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug)]
struct AttemptFailure {
    transient: bool,
    kind: FailureKind,
}

#[derive(Debug)]
enum FailureKind {
    Status(u16),
    Transport(String),
    Invalid(String),
}

impl AttemptFailure {
    fn invalid(detail: String) -> Self {
        Self {
            transient: false,
            kind: FailureKind::Invalid(detail),
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Self::invalid(e.to_string());
        }
        Self {
            transient: true,
            kind: FailureKind::Transport(e.to_string()),
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FailureKind::Status(s) => write!(f, "HTTP {s}"),
            FailureKind::Transport(d) | FailureKind::Invalid(d) => f.write_str(d),
        }
    }
}

/// Append `params` to `url` as a query string.
pub fn with_query(url: &str, params: &[(String, String)]) -> Result<String, NetworkError> {
    if params.is_empty() {
        return Ok(url.to_string());
    }
    url::Url::parse_with_params(url, params)
        .map(String::from)
        .map_err(|e| NetworkError::InvalidRequest(format!("bad URL '{url}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 0.0)
    }

    #[test]
    fn default_policy_retries_post() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 10);
        assert!((p.backoff_factor - 0.1).abs() < f64::EPSILON);
        assert!(p.allows_method(&Method::POST));
        assert!(p.allows_method(&Method::GET));
        assert!(!p.allows_method(&Method::PATCH));
        assert!(p.is_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!p.is_retry_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let p = RetryPolicy::new(10, 0.1);
        assert_eq!(p.backoff(0), Duration::ZERO);
        assert_eq!(p.backoff(1), Duration::from_secs_f64(0.1));
        assert_eq!(p.backoff(2), Duration::from_secs_f64(0.2));
        assert_eq!(p.backoff(4), Duration::from_secs_f64(0.8));
        assert_eq!(p.backoff(40), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, _> = retry_with_backoff(&fast_policy(5), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(AttemptError::Transient(format!("fail {n}")))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Transient("down")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.error, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Permanent("bad request")) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_query_appends_params() {
        let url = with_query(
            "http://localhost:8080/api/convert",
            &[("remove_line_no".into(), "n".into())],
        )
        .unwrap();
        assert_eq!(url, "http://localhost:8080/api/convert?remove_line_no=n");
        assert_eq!(with_query("not a url", &[]).unwrap(), "not a url");
    }
}
