//! Retry classification for failed API responses.

use log::warn;
use reqwest::StatusCode;
use std::time::Duration;

use super::error::{ApiError, classify_error_response};

/// Fixed wait between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Total time budget for retries.
pub const RETRY_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

/// Messages the API returns while a freshly created workspace is still being
/// provisioned. They clear up on their own after a short while.
pub const TRANSIENT_ERROR_MATCHES: [&str; 3] = [
    "com.databricks.backend.manager.util.UnknownWorkerEnvironmentException",
    "does not have any associated worker environments",
    "There is no worker environment with id",
];

/// Linear backoff: a fixed delay and a bounded number of retries after the
/// first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: RETRY_DELAY,
            max_retries: (RETRY_MAX_DURATION.as_secs() / RETRY_DELAY.as_secs()) as u32,
        }
    }
}

/// Outcome of inspecting one response.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    /// Classified failure; `None` for a successful status.
    pub error: Option<ApiError>,
}

impl RetryDecision {
    fn success() -> Self {
        Self {
            retry: false,
            error: None,
        }
    }
}

/// True when the message contains one of [`TRANSIENT_ERROR_MATCHES`].
pub fn is_transient(message: &str) -> bool {
    TRANSIENT_ERROR_MATCHES
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Classifies a response. Statuses below 400 are not errors; anything else is
/// parsed into an [`ApiError`] and retried only when its message is transient.
/// A body that is neither JSON nor an HTML page with a `<pre>` block is
/// terminal whatever it contains.
pub fn check_retry(status: StatusCode, body: &[u8], resource: &str) -> RetryDecision {
    if status.as_u16() < 400 {
        return RetryDecision::success();
    }

    warn!("Failed request detected. Status Code: {}", status.as_u16());

    let (error, recognized) = classify_error_response(body, status, resource);
    let retry = recognized && is_transient(&error.message);
    if retry {
        warn!("Failed request detected: Retryable type found. Attempting retry...");
    }

    RetryDecision {
        retry,
        error: Some(error),
    }
}
