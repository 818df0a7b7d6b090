use super::error::Error;
use std::time::Duration;

/// Bounded exponential backoff for transient completion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` wins but is still capped by `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let delay = match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16))),
        };
        delay.min(self.max_delay)
    }
}

/// Classify a retryable error, returning the category if retryable.
///
/// Returns `Some(category)` for transient errors that should be retried,
/// `None` for non-retryable errors. API rejections are judged by status
/// code only; the body is free text and never inspected.
pub(crate) fn retryable_category(err: &Error) -> Option<&'static str> {
    match err {
        Error::RateLimited { .. } => Some("Rate limited"),
        Error::Timeout(_) => Some("Request timed out"),
        Error::Http(e) if e.is_timeout() => Some("Request timed out"),
        Error::Http(e) if e.is_connect() || e.is_request() => Some("Network error"),
        Error::Api {
            status: Some(status),
            ..
        } if status.is_server_error() => Some("Server error"),
        Error::Api { .. }
        | Error::Http(_)
        | Error::MissingApiKey { .. }
        | Error::MalformedResponse(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, body: &str) -> Error {
        Error::Api {
            status: reqwest::StatusCode::from_u16(status).ok(),
            message: format!("HTTP {status}: {body}"),
        }
    }

    #[test]
    fn test_rate_limit_detection() {
        assert_eq!(
            retryable_category(&Error::RateLimited { retry_after: None }),
            Some("Rate limited")
        );
    }

    #[test]
    fn test_timeout_detection() {
        assert_eq!(
            retryable_category(&Error::Timeout(Duration::from_secs(120))),
            Some("Request timed out")
        );
    }

    #[test]
    fn test_server_error_detection() {
        for status in [500, 502, 503, 504] {
            assert_eq!(
                retryable_category(&api(status, "oops")),
                Some("Server error"),
                "{status}"
            );
        }
    }

    #[test]
    fn test_non_retryable() {
        assert_eq!(retryable_category(&api(400, "nope")), None);
        assert_eq!(retryable_category(&api(401, "Invalid API key")), None);
        assert_eq!(
            retryable_category(&Error::MalformedResponse("no choices".into())),
            None
        );
        assert_eq!(
            retryable_category(&Error::api("Bearer token contains invalid header characters")),
            None
        );
    }

    #[test]
    fn test_client_error_body_text_is_ignored() {
        let context_length = api(
            400,
            "your messages resulted in 4293 tokens; rate limit tier: free; server error",
        );
        assert_eq!(retryable_category(&context_length), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40, None), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, Some(3)), Duration::from_secs(3));
        assert_eq!(policy.delay_for(0, Some(600)), policy.max_delay);
    }
}
