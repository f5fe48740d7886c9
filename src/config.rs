//! Client configuration: host, credentials, headers and the shared transport.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::http::{RequestError, RetryPolicy};

/// Per-call timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = "dbapi-client-sdk";

/// API version used when a request does not name one.
pub const DEFAULT_API_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    /// `Authorization: Basic <token>`; the token is the encoded credentials.
    Basic,
    #[default]
    Bearer,
}

/// A credential plus optional lifetime metadata (unix seconds).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub created_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            created_at: None,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Non-empty and not past its expiry.
    pub fn is_usable(&self, now: i64) -> bool {
        !self.value.is_empty() && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// Obtains a fresh credential when the config has none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, config: &ClientConfig) -> Result<AccessToken>;
}

/// Connection settings shared by every request made with it.
///
/// Meant to be created once and shared (usually behind an `Arc`). The HTTP
/// transport is built on first use and reused afterwards.
pub struct ClientConfig {
    pub host: String,
    token: RwLock<AccessToken>,
    pub auth_type: AuthType,
    pub user_agent: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub insecure_skip_verify: bool,
    pub timeout_seconds: Option<u64>,
    pub retry_policy: RetryPolicy,
    authorizer: Option<Arc<dyn Authorizer>>,
    auth_lock: Mutex<()>,
    transport: OnceCell<Client>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("auth_type", &self.auth_type)
            .field("user_agent", &self.user_agent)
            .field("default_headers", &self.default_headers)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("retry_policy", &self.retry_policy)
            .field("has_authorizer", &self.authorizer.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: RwLock::new(AccessToken::default()),
            auth_type: AuthType::default(),
            user_agent: None,
            default_headers: BTreeMap::new(),
            insecure_skip_verify: false,
            timeout_seconds: None,
            retry_policy: RetryPolicy::default(),
            authorizer: None,
            auth_lock: Mutex::new(()),
            transport: OnceCell::new(),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(AccessToken::new(token));
        self
    }

    pub fn with_access_token(self, token: AccessToken) -> Self {
        self.set_token(token);
        self
    }

    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Current credential value.
    pub fn token(&self) -> String {
        self.access_token().value
    }

    pub fn access_token(&self) -> AccessToken {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_token(&self, token: AccessToken) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn is_setup(&self) -> bool {
        self.transport.initialized()
    }

    /// Returns the transport, building it on the first call.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self) -> Result<&Client> {
        self.transport
            .get_or_try_init(|| async {
                debug!(
                    "Building HTTP transport for {} (timeout {:?}, insecure {})",
                    self.host,
                    self.timeout(),
                    self.insecure_skip_verify
                );
                Client::builder()
                    .timeout(self.timeout())
                    .danger_accept_invalid_certs(self.insecure_skip_verify)
                    .build()
                    .context("Failed to build HTTP client")
            })
            .await
    }

    /// Runs the authorizer if the current token is missing or expired.
    ///
    /// At most one authorization runs at a time per config; callers queued
    /// behind it see the refreshed token and return without re-running it.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_token(&self) -> Result<()> {
        let Some(authorizer) = &self.authorizer else {
            return Ok(());
        };

        let _guard = self.auth_lock.lock().await;
        if self.access_token().is_usable(unix_now()) {
            debug!("Already authorized");
            return Ok(());
        }

        debug!("Not authorized, attempting to authorize");
        let token = authorizer
            .authorize(self)
            .await
            .context("Failed to authorize")?;
        self.set_token(token);
        Ok(())
    }

    pub fn auth_header(&self) -> BTreeMap<String, String> {
        let scheme = match self.auth_type {
            AuthType::Basic => "Basic",
            AuthType::Bearer => "Bearer",
        };
        BTreeMap::from([
            (
                "Authorization".to_string(),
                format!("{} {}", scheme, self.token()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    pub fn user_agent_header(&self) -> BTreeMap<String, String> {
        let agent = self
            .user_agent
            .as_deref()
            .filter(|ua| !ua.is_empty())
            .unwrap_or(DEFAULT_USER_AGENT);
        BTreeMap::from([("User-Agent".to_string(), agent.to_string())])
    }

    /// Auth headers, then configured defaults, then the user agent. Later
    /// entries replace earlier ones with the same literal key.
    pub fn default_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.auth_header();
        headers.extend(self.default_headers.clone());
        headers.extend(self.user_agent_header());
        headers
    }

    /// `<scheme>://<host>/api/<version><path>`.
    pub fn request_uri(&self, path: &str, api_version: Option<&str>) -> Result<String> {
        let version = api_version
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_API_VERSION);

        let parsed = Url::parse(&self.host)
            .map_err(|e| RequestError::InvalidHost(format!("{}: {}", self.host, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RequestError::InvalidHost(format!("{}: missing host", self.host)))?;
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(format!(
            "{}://{}/api/{}{}",
            parsed.scheme(),
            authority,
            version,
            path
        ))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
