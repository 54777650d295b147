//! HTTP transport with bounded retry.
//!
//! Every outbound call in the pipeline goes through [`RetryTransport`]:
//! transient failures (connection errors, HTTP 429, HTTP 5xx) are retried
//! up to a fixed attempt budget with a configurable delay, and every failed
//! attempt is appended to the run's error log before the next try.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use wikiharvest_shared::{ErrorLog, HarvestError, Result, RunConfig};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("wikiharvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry budget and pacing for outbound calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Double the delay after each failed attempt instead of keeping it fixed.
    pub exponential_backoff: bool,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        if self.exponential_backoff {
            self.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.retry_delay
        }
    }
}

impl From<&RunConfig> for RetryPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            exponential_backoff: config.exponential_backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryTransport
// ---------------------------------------------------------------------------

/// Classification of a single failed attempt.
enum AttemptError {
    /// Worth retrying: connection failure, 429, or 5xx.
    Transient(String),
    /// Not worth retrying: client-side HTTP error (4xx other than 429).
    Fatal(HarvestError),
}

/// A `reqwest` client wrapped with retry, pacing, and error-log plumbing.
#[derive(Debug, Clone)]
pub struct RetryTransport {
    client: Client,
    policy: RetryPolicy,
    errlog: ErrorLog,
}

impl RetryTransport {
    /// Build the transport with the shared HTTP client settings.
    pub fn new(policy: RetryPolicy, errlog: ErrorLog) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy,
            errlog,
        })
    }

    /// The underlying HTTP client, for building requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Where failed attempts are logged.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errlog
    }

    /// Execute a request with retry.
    ///
    /// `build` is called once per attempt so the request body is rebuilt
    /// fresh each time. `key` identifies the caller (item/stage) in the
    /// error log. Returns the first successful response, a fatal error for
    /// non-retryable failures, or [`HarvestError::Exhausted`] once the
    /// attempt budget is spent.
    pub async fn execute<F>(&self, key: &str, mut build: F) -> Result<Response>
    where
        F: FnMut(&Client) -> RequestBuilder,
    {
        let max = self.policy.max_attempts.max(1);

        for attempt in 1..=max {
            match self.attempt(build(&self.client)).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::Fatal(e)) => {
                    self.errlog.append(key, &e.to_string());
                    return Err(e);
                }
                Err(AttemptError::Transient(reason)) => {
                    warn!(key, attempt, max, %reason, "call attempt failed");
                    self.errlog
                        .append(key, &format!("attempt {attempt}/{max}: {reason}"));

                    if attempt < max {
                        let delay = self.policy.delay_after(attempt);
                        debug!(key, delay_ms = delay.as_millis() as u64, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(HarvestError::Exhausted { attempts: max })
    }

    /// Send one request and classify the outcome.
    async fn attempt(&self, request: RequestBuilder) -> std::result::Result<Response, AttemptError> {
        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Transient(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            let snippet = body.chars().take(120).collect::<String>();
            return Err(AttemptError::Transient(format!("HTTP {status}: {snippet}")));
        }

        Err(AttemptError::Fatal(HarvestError::Network(format!(
            "HTTP {status}"
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_errlog() -> (PathBuf, ErrorLog) {
        let p = std::env::temp_dir().join(format!("wh-transport-{}.log", uuid::Uuid::now_v7()));
        (p.clone(), ErrorLog::new(&p))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_millis(1),
            exponential_backoff: false,
        }
    }

    #[test]
    fn delay_grows_when_exponential() {
        let policy = RetryPolicy {
            max_attempts: 5,
            retry_delay: Duration::from_millis(100),
            exponential_backoff: true,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_fixed_by_default() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_after(1), policy.delay_after(4));
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
            .mount(&server)
            .await;

        let (log_path, errlog) = temp_errlog();
        let transport = RetryTransport::new(fast_policy(5), errlog).unwrap();

        let url = format!("{}/ok", server.uri());
        let response = transport.execute("1/fetch", |c| c.get(&url)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(!log_path.exists());

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn retries_429_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let (log_path, errlog) = temp_errlog();
        let transport = RetryTransport::new(fast_policy(5), errlog).unwrap();

        let url = format!("{}/flaky", server.uri());
        let response = transport.execute("2/fetch", |c| c.get(&url)).await.unwrap();
        assert_eq!(response.status(), 200);

        // Two failed attempts logged before the success
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("attempt 1/5"));
        assert!(log.contains("attempt 2/5"));

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500).set_body_string("server overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let (log_path, errlog) = temp_errlog();
        let transport = RetryTransport::new(fast_policy(3), errlog).unwrap();

        let url = format!("{}/down", server.uri());
        let err = transport
            .execute("3/summarize", |c| c.get(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Exhausted { attempts: 3 }));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 3);

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (log_path, errlog) = temp_errlog();
        let transport = RetryTransport::new(fast_policy(5), errlog).unwrap();

        let url = format!("{}/missing", server.uri());
        let err = transport.execute("4/fetch", |c| c.get(&url)).await.unwrap_err();
        assert!(matches!(err, HarvestError::Network(_)));

        let _ = std::fs::remove_file(&log_path);
    }
}
