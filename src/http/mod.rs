//! Transport core: request building, audit logging, retry and error
//! classification.

mod audit;
mod client;
mod error;
mod query;
mod retry;

pub use audit::{AUDIT_RECORD_MAX_BYTES, audit_get_payload, audit_non_get_payload};
pub use client::{ApiClient, perform_query};
pub use error::{ApiError, ApiErrorBody, parse_error_response};
pub use query::{Query, RequestError, RequestPayload};
pub use retry::{
    RETRY_DELAY, RETRY_MAX_DURATION, RetryDecision, RetryPolicy, TRANSIENT_ERROR_MATCHES,
    check_retry, is_transient,
};
