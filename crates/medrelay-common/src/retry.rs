//! Bounded retry with exponential backoff for page and batch requests.

use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::RelayError;

/// Retry ceiling and backoff base shared by all fetchers.
/// Delays double from the base: 2s, 4s, 8s, ...
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// How a failed request is handled by the fetch loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, connection failure, 5xx or 429; retried up to the bound.
    Transient,
    /// Credentials rejected or missing; never retried.
    Auth,
    /// The request or payload is structurally wrong; never retried.
    Malformed,
}

pub fn classify(err: &RelayError) -> ErrorClass {
    match err {
        RelayError::Http(e) => {
            if e.is_timeout() || e.is_connect() {
                ErrorClass::Transient
            } else if e.is_decode() {
                ErrorClass::Malformed
            } else {
                match e.status() {
                    Some(s) if s.is_server_error() => ErrorClass::Transient,
                    Some(StatusCode::TOO_MANY_REQUESTS) => ErrorClass::Transient,
                    Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
                        ErrorClass::Auth
                    }
                    Some(_) => ErrorClass::Malformed,
                    None => ErrorClass::Transient,
                }
            }
        }
        RelayError::Auth(_) => ErrorClass::Auth,
        RelayError::Serialization(_)
        | RelayError::Xml(_)
        | RelayError::MalformedResponse(_)
        | RelayError::Security(_)
        | RelayError::Config(_) => ErrorClass::Malformed,
        // Errors of unknown provenance are retried; the attempt bound caps
        // the cost either way.
        RelayError::Other(_) => ErrorClass::Transient,
    }
}

/// Runs `op`, retrying transient failures up to the policy bound with
/// exponential backoff. Auth and malformed failures are returned
/// immediately; so is the last transient error once attempts run out.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match classify(&err) {
                ErrorClass::Transient if attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "request failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn test_classify_non_http_variants() {
        assert_eq!(
            classify(&RelayError::Auth("no credentials".into())),
            ErrorClass::Auth
        );
        assert_eq!(
            classify(&RelayError::MalformedResponse("truncated".into())),
            ErrorClass::Malformed
        );
        assert_eq!(
            classify(&RelayError::Xml("unexpected EOF".into())),
            ErrorClass::Malformed
        );
        assert_eq!(
            classify(&RelayError::Other(anyhow::anyhow!("boom"))),
            ErrorClass::Transient
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = with_retry(&policy, "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RelayError::Other(anyhow::anyhow!("flaky")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_bound() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), RelayError> = with_retry(&policy, "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayError::Other(anyhow::anyhow!("still down"))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_auth() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), RelayError> = with_retry(&policy, "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayError::Auth("rejected".into())) }
        })
        .await;

        assert!(matches!(result, Err(RelayError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
