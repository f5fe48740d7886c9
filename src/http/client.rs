//! Request execution: build, audit, send with retry, classify.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::audit::{audit_get_payload, audit_non_get_payload};
use super::error::ApiError;
use super::query::{Query, RequestError};
use super::retry::{RetryPolicy, check_retry};
use crate::config::ClientConfig;
use crate::mask::SecretsMask;

/// Performs one API call and returns the raw response body.
///
/// Failures come back as [`ApiError`] (classified response), [`RequestError`]
/// (bad input or cancellation) or the underlying `reqwest::Error` when no
/// response was received at all.
#[tracing::instrument(skip(config, query), fields(method = %query.method, path = %query.path))]
pub async fn perform_query(config: &ClientConfig, query: Query<'_>) -> Result<Vec<u8>> {
    let mut request_url = if query.use_raw_path {
        query.path.clone()
    } else {
        config.request_uri(&query.path, query.api_version.as_deref())?
    };

    config.get_or_create_token().await?;
    // Header names are case-insensitive; per-query headers replace defaults.
    let mut headers = to_header_map(&config.default_headers())?;
    for (name, value) in to_header_map(&query.headers)? {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }

    let client = config.setup().await?;

    let body = if query.method == Method::GET {
        let params = query.payload.query_string()?;
        if !params.is_empty() {
            request_url.push(if request_url.contains('?') { '&' } else { '?' });
            request_url.push_str(&params);
        }
        audit_get_payload(&request_url, query.secrets_mask);
        Vec::new()
    } else {
        let body = query.payload.body()?;
        audit_non_get_payload(
            query.method.as_str(),
            &request_url,
            &query.payload.audit_value(),
            query.secrets_mask,
        );
        body
    };

    let request = PreparedRequest {
        method: query.method.clone(),
        url: request_url,
        headers,
        body,
    };

    execute(client, &request, &config.retry_policy, query.cancel.as_ref()).await
}

struct PreparedRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

enum AttemptState {
    Sending,
    Evaluating(Response),
    Retrying(ApiError),
    Succeeded(Vec<u8>),
    Failed(anyhow::Error),
}

/// Drives one request through send / evaluate / back off until it settles.
async fn execute(
    client: &Client,
    request: &PreparedRequest,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<u8>> {
    let mut retries: u32 = 0;
    let mut state = AttemptState::Sending;

    loop {
        state = match state {
            AttemptState::Sending => {
                let send = client
                    .request(request.method.clone(), &request.url)
                    .headers(request.headers.clone())
                    .body(request.body.clone())
                    .send();
                match cancellable(cancel, send).await {
                    Some(Ok(response)) => AttemptState::Evaluating(response),
                    Some(Err(e)) => AttemptState::Failed(e.into()),
                    None => AttemptState::Failed(RequestError::Cancelled.into()),
                }
            }
            AttemptState::Evaluating(response) => {
                let status = response.status();
                let resource = response.url().path().to_string();
                match response.bytes().await {
                    Err(e) => AttemptState::Failed(
                        anyhow::Error::from(e).context("Failed to read response body"),
                    ),
                    Ok(body) => {
                        let decision = check_retry(status, &body, &resource);
                        match decision.error {
                            None => AttemptState::Succeeded(body.to_vec()),
                            Some(error) if decision.retry && retries < policy.max_retries => {
                                AttemptState::Retrying(error)
                            }
                            Some(error) => {
                                if decision.retry {
                                    warn!(
                                        "{} {}: giving up after {} attempts",
                                        request.method,
                                        resource,
                                        retries + 1
                                    );
                                }
                                AttemptState::Failed(error.into())
                            }
                        }
                    }
                }
            }
            AttemptState::Retrying(error) => {
                retries += 1;
                warn!(
                    "{} {}: attempt {}/{} failed ({}), retrying in {:?}...",
                    request.method,
                    error.resource,
                    retries,
                    policy.max_retries + 1,
                    error.message,
                    policy.delay
                );
                match cancellable(cancel, tokio::time::sleep(policy.delay)).await {
                    Some(()) => AttemptState::Sending,
                    None => AttemptState::Failed(RequestError::Cancelled.into()),
                }
            }
            AttemptState::Succeeded(body) => return Ok(body),
            AttemptState::Failed(e) => {
                debug!("{} request failed: {}", request.method, e);
                return Err(e);
            }
        };
    }
}

/// `None` when the token fires before `fut` completes.
async fn cancellable<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match cancel {
        None => Some(fut.await),
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
    }
}

fn to_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| RequestError::InvalidHeader(format!("{}: {}", key, e)))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| RequestError::InvalidHeader(format!("{}: {}", key, e)))?;
        if name == AUTHORIZATION {
            value.set_sensitive(true);
        }
        map.insert(name, value);
    }
    Ok(map)
}

/// Shared config plus a secrets mask that always covers the current token.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    mask: SecretsMask,
}

impl ApiClient {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            mask: SecretsMask::default(),
        }
    }

    /// Additional value to keep out of the audit log.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.mask.add(secret);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs `query` with this client's mask merged into the query's own.
    pub async fn perform(&self, query: Query<'_>) -> Result<Vec<u8>> {
        let mut mask = self.mask.clone();
        if let Some(own) = query.secrets_mask {
            mask.merge(own);
        }
        // Authorize first so a freshly issued token is masked too.
        self.config.get_or_create_token().await?;
        mask.add(self.config.token());

        perform_query(&self.config, query.mask(&mask)).await
    }

    /// GET `path` with `params` as the query string, decoding a JSON reply.
    #[tracing::instrument(skip(self, params))]
    pub async fn get_json<T, P>(&self, path: &str, params: &P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let body = self.perform(Query::get(path).json(params)?).await?;
        serde_json::from_slice(&body).context("Failed to parse JSON response")
    }

    /// POST `payload` as JSON to `path`, decoding a JSON reply.
    #[tracing::instrument(skip(self, payload))]
    pub async fn post_json<T, B>(&self, path: &str, payload: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = self.perform(Query::post(path).json(payload)?).await?;
        serde_json::from_slice(&body).context("Failed to parse JSON response")
    }
}
