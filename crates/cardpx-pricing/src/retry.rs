//! Bounded retry with back-off and jitter for provider calls.
//!
//! [`retry_with_backoff`] wraps one provider request and retries it on
//! transient failures (network errors, timeouts, 5xx). Everything else is
//! returned on the first attempt so scarce API quota is not burned on
//! requests that cannot succeed.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

const MAX_DELAY_MS: u64 = 60_000;

/// How many extra attempts a provider call gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base_ms: 3_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }
}

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// **Retriable:** timeouts, connection failures and HTTP 5xx.
///
/// **Not retriable:** 429 (retrying only deepens the rate-limit hole),
/// other 4xx, malformed bodies and configuration errors.
pub(crate) fn is_retriable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        ProviderError::UnexpectedStatus { status, .. } => *status >= 500,
        ProviderError::Timeout(_) => true,
        ProviderError::RateLimited { .. }
        | ProviderError::Deserialize { .. }
        | ProviderError::InvalidRate(_)
        | ProviderError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts on
/// transient errors.
///
/// The delay doubles per attempt from `backoff_base_ms`, is capped at 60 s
/// and carries ±25 % jitter.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    source: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = policy
                    .backoff_base_ms
                    .saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    source,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "transient provider error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn server_error() -> ProviderError {
        ProviderError::UnexpectedStatus {
            status: 504,
            url: "http://provider/cards/x".to_owned(),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 0,
        }
    }

    #[test]
    fn gateway_timeout_is_retriable() {
        assert!(is_retriable(&server_error()));
    }

    #[test]
    fn client_error_is_not_retriable() {
        assert!(!is_retriable(&ProviderError::UnexpectedStatus {
            status: 401,
            url: "http://provider".to_owned(),
        }));
    }

    #[test]
    fn rate_limited_is_not_retriable() {
        assert!(!is_retriable(&ProviderError::RateLimited {
            source_name: "justtcg".to_owned(),
            retry_after_secs: 60,
        }));
    }

    #[test]
    fn deserialize_error_is_not_retriable() {
        let src = serde_json::from_str::<()>("invalid").unwrap_err();
        assert!(!is_retriable(&ProviderError::Deserialize {
            context: "test".to_owned(),
            source: src,
        }));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, ProviderError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_once_then_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(policy(1), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(server_error())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(ProviderError::UnexpectedStatus { status: 504, .. })
        ));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "one original attempt plus one retry"
        );
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err::<u32, _>(server_error())
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_rate_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(ProviderError::RateLimited {
                    source_name: "test".to_owned(),
                    retry_after_secs: 1,
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
    }
}
