//! Transient/fatal classification and exponential backoff.
//!
//! Transient errors are network failures, timeouts, HTTP 429/5xx and GraphQL
//! errors coded `THROTTLED` or `INTERNAL_SERVER_ERROR`. Everything else is
//! fatal and returned on the first occurrence.
//!
//! The delay before retry `n` (1-based) is `min(factor * base^(n-1), max)`,
//! halved and topped up with a uniform random share of the other half.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::clients::graphql::{INTERNAL_SERVER_ERROR_CODE, THROTTLED_CODE};
use crate::clients::{GraphqlError, HttpError};
use crate::extract::ExtractError;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_TRIES: u32 = 8;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_secs(10);

/// Default growth rate of the delay.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Default cap on a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    Retry(Duration),
    /// The error is transient but no attempts are left.
    Exhausted,
    /// The error is not worth retrying.
    Fatal,
}

/// Backoff parameters for transient failures.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use shopify_extract::extract::RetryPolicy;
///
/// let policy = RetryPolicy::new(3)
///     .with_factor(Duration::from_secs(1))
///     .without_jitter();
///
/// assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
/// assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_tries: u32,
    factor: Duration,
    base: f64,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            factor: DEFAULT_BACKOFF_FACTOR,
            base: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_tries` attempts (at least one).
    #[must_use]
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn with_factor(mut self, factor: Duration) -> Self {
        self.factor = factor;
        self
    }

    /// Sets the growth rate of the delay (values below 1 are treated as 1).
    #[must_use]
    pub fn with_base(mut self, base: f64) -> Self {
        self.base = if base.is_nan() { 1.0 } else { base.max(1.0) };
        self
    }

    /// Sets the cap on a single delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Attempts allowed, including the first.
    #[must_use]
    pub const fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = (self.factor.as_secs_f64() * self.base.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(secs);

        if !self.jitter {
            return delay;
        }
        let half = delay.as_secs_f64() / 2.0;
        let extra = rand::thread_rng().gen_range(0.0..=half);
        Duration::from_secs_f64(half + extra)
    }

    /// Decides what to do after attempt number `attempt` failed with `error`.
    ///
    /// A `Retry-After` header on a 429 response lengthens the delay.
    #[must_use]
    pub fn decide(&self, error: &GraphqlError, attempt: u32) -> RetryDecision {
        if !is_transient(error) {
            return RetryDecision::Fatal;
        }
        if attempt >= self.max_tries {
            return RetryDecision::Exhausted;
        }

        let mut wait = self.backoff_delay(attempt);
        if let GraphqlError::Http(HttpError::Response(response)) = error {
            if let Some(after) = response.retry_after.filter(|secs| secs.is_finite() && *secs > 0.0)
            {
                let asked = Duration::try_from_secs_f64(after).unwrap_or(self.max_delay);
                wait = wait.max(asked.min(self.max_delay));
            }
        }
        RetryDecision::Retry(wait)
    }
}

/// Returns `true` if `error` is worth retrying.
#[must_use]
pub fn is_transient(error: &GraphqlError) -> bool {
    match error {
        GraphqlError::Http(http) => match http {
            HttpError::Network(_) | HttpError::Timeout { .. } | HttpError::Connection { .. } => {
                true
            }
            HttpError::Response(response) => response.is_retriable_status(),
            HttpError::InvalidRequest(_) => false,
        },
        GraphqlError::Query { .. } => {
            error.has_code(THROTTLED_CODE) || error.has_code(INTERNAL_SERVER_ERROR_CODE)
        }
        GraphqlError::MalformedResponse { .. } => false,
    }
}

/// Runs `op` until it succeeds, fails fatally or runs out of attempts.
///
/// # Errors
///
/// Returns [`ExtractError::Graphql`] for fatal errors and
/// [`ExtractError::RetriesExhausted`] when every attempt failed transiently.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, ExtractError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GraphqlError>>,
{
    let mut attempt = 1;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.decide(&error, attempt) {
            RetryDecision::Retry(wait) => {
                tracing::warn!(
                    operation,
                    attempt,
                    wait_secs = wait.as_secs_f64(),
                    %error,
                    "Transient error, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            RetryDecision::Exhausted => {
                return Err(ExtractError::RetriesExhausted {
                    tries: attempt,
                    source: error,
                })
            }
            RetryDecision::Fatal => return Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{HttpResponseError, InvalidHttpRequestError};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> GraphqlError {
        GraphqlError::Http(HttpError::Response(HttpResponseError {
            code,
            message: "{}".to_string(),
            error_reference: None,
            retry_after: None,
        }))
    }

    fn query_error(code: &str) -> GraphqlError {
        GraphqlError::Query {
            codes: vec![code.to_string()],
            errors: json!([{"extensions": {"code": code}}]),
            response: json!({}),
        }
    }

    #[test]
    fn test_classification() {
        assert!(is_transient(&status(429)));
        assert!(is_transient(&status(502)));
        assert!(!is_transient(&status(404)));
        assert!(is_transient(&query_error("THROTTLED")));
        assert!(is_transient(&query_error("INTERNAL_SERVER_ERROR")));
        assert!(!is_transient(&query_error("ACCESS_DENIED")));
        assert!(is_transient(&GraphqlError::Http(HttpError::Timeout {
            message: "60s".to_string()
        })));
        assert!(!is_transient(&GraphqlError::Http(HttpError::InvalidRequest(
            InvalidHttpRequestError::EmptyQuery
        ))));
        assert!(!is_transient(&GraphqlError::MalformedResponse {
            reason: "x".to_string(),
            response: json!(null),
        }));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(160));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(300));
        assert_eq!(policy.backoff_delay(60), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff_delay(2);
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(20));
        }
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::new(3).without_jitter();
        assert_eq!(
            policy.decide(&status(500), 1),
            RetryDecision::Retry(Duration::from_secs(10))
        );
        assert_eq!(policy.decide(&status(500), 3), RetryDecision::Exhausted);
        assert_eq!(policy.decide(&status(400), 1), RetryDecision::Fatal);
    }

    #[test]
    fn test_retry_after_lengthens_delay() {
        let policy = RetryPolicy::new(3)
            .with_factor(Duration::from_secs(1))
            .without_jitter();
        let error = GraphqlError::Http(HttpError::Response(HttpResponseError {
            code: 429,
            message: "{}".to_string(),
            error_reference: None,
            retry_after: Some(7.0),
        }));
        assert_eq!(
            policy.decide(&error, 1),
            RetryDecision::Retry(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_retry_after_is_capped_at_max_delay() {
        let policy = RetryPolicy::new(3).without_jitter();
        let error = GraphqlError::Http(HttpError::Response(HttpResponseError {
            code: 429,
            message: "{}".to_string(),
            error_reference: None,
            retry_after: Some(1e300),
        }));
        assert_eq!(
            policy.decide(&error, 1),
            RetryDecision::Retry(Duration::from_secs(300))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(4).without_jitter();

        let result = retry(&policy, "fetch page", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(status(503))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_tries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3).without_jitter();

        let result: Result<(), _> = retry(&policy, "fetch page", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(query_error("THROTTLED"))
        })
        .await;

        assert!(matches!(
            result,
            Err(ExtractError::RetriesExhausted { tries: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&RetryPolicy::default(), "fetch page", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(status(401))
        })
        .await;

        assert!(matches!(result, Err(ExtractError::Graphql(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
