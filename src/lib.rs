//! Authenticated HTTP client for a REST control-plane API.
//!
//! [`ClientConfig`] holds host, credentials and the shared transport;
//! [`perform_query`] runs one [`Query`] through request building, masked audit
//! logging, retry of transient failures and error classification.

pub mod config;
pub mod http;
pub mod mask;

pub use config::{AccessToken, AuthType, Authorizer, ClientConfig};
pub use http::{ApiClient, ApiError, Query, RequestError, RequestPayload, RetryPolicy, perform_query};
pub use mask::SecretsMask;
