//! Logical request description and its encoding into URL, headers and body.

use anyhow::Result;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use crate::mask::SecretsMask;

/// Malformed input or an interrupted call. Never retried.
#[derive(Debug)]
pub enum RequestError {
    /// The configured host could not be parsed as a URL.
    InvalidHost(String),
    /// The payload cannot be encoded for this method.
    UnsupportedPayload(String),
    /// A header name or value is not valid HTTP.
    InvalidHeader(String),
    /// The caller cancelled the request.
    Cancelled,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::InvalidHost(msg) => write!(f, "Invalid host: {}", msg),
            RequestError::UnsupportedPayload(msg) => write!(f, "Unsupported payload: {}", msg),
            RequestError::InvalidHeader(msg) => write!(f, "Invalid header: {}", msg),
            RequestError::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Request payload. GET encodes it into the query string, other methods send
/// it as the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestPayload {
    #[default]
    Empty,
    Json(Value),
    /// Already-serialized body, sent verbatim.
    Raw(String),
}

impl RequestPayload {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(RequestPayload::Json(serde_json::to_value(value)?))
    }

    /// Value written to the audit log.
    pub(crate) fn audit_value(&self) -> Value {
        match self {
            RequestPayload::Empty => Value::Null,
            RequestPayload::Json(value) => value.clone(),
            RequestPayload::Raw(text) => Value::String(text.clone()),
        }
    }

    /// Body bytes for non-GET methods.
    pub(crate) fn body(&self) -> Result<Vec<u8>> {
        match self {
            RequestPayload::Empty => Ok(Vec::new()),
            RequestPayload::Json(value) => Ok(serde_json::to_vec(value)?),
            RequestPayload::Raw(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    /// URL-encoded query string for GET. Null fields are skipped, arrays
    /// become repeated keys, keys come out sorted.
    pub(crate) fn query_string(&self) -> Result<String> {
        let fields = match self {
            RequestPayload::Empty => return Ok(String::new()),
            RequestPayload::Json(Value::Null) => return Ok(String::new()),
            RequestPayload::Json(Value::Object(fields)) => fields,
            RequestPayload::Json(other) => {
                return Err(RequestError::UnsupportedPayload(format!(
                    "GET parameters must be an object, got {}",
                    other
                ))
                .into());
            }
            RequestPayload::Raw(_) => {
                return Err(RequestError::UnsupportedPayload(
                    "GET parameters cannot be a raw body".to_string(),
                )
                .into());
            }
        };

        let mut pairs: Vec<(&str, String)> = Vec::new();
        for (key, value) in fields {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = scalar_param(key, item)? {
                            pairs.push((key.as_str(), v));
                        }
                    }
                }
                other => {
                    if let Some(v) = scalar_param(key, other)? {
                        pairs.push((key.as_str(), v));
                    }
                }
            }
        }

        Ok(serde_urlencoded::to_string(&pairs)?)
    }
}

fn scalar_param(key: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Array(_) | Value::Object(_) => Err(RequestError::UnsupportedPayload(format!(
            "nested value for GET parameter '{}'",
            key
        ))
        .into()),
    }
}

/// One logical API call.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    pub method: Method,
    /// API path such as `/clusters/get`, or a full URL with [`Query::raw_path`].
    pub path: String,
    /// Defaults to `2.0`.
    pub api_version: Option<String>,
    /// Overrides the config's default headers.
    pub headers: BTreeMap<String, String>,
    pub use_raw_path: bool,
    pub payload: RequestPayload,
    pub secrets_mask: Option<&'a SecretsMask>,
    pub cancel: Option<CancellationToken>,
}

impl<'a> Query<'a> {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            api_version: None,
            headers: BTreeMap::new(),
            use_raw_path: false,
            payload: RequestPayload::Empty,
            secrets_mask: None,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Treats `path` as a complete URL.
    pub fn raw_path(mut self) -> Self {
        self.use_raw_path = true;
        self
    }

    pub fn payload(mut self, payload: RequestPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        Ok(self.payload(RequestPayload::json(value)?))
    }

    pub fn raw_body(self, body: impl Into<String>) -> Self {
        self.payload(RequestPayload::Raw(body.into()))
    }

    pub fn mask(mut self, mask: &'a SecretsMask) -> Self {
        self.secrets_mask = Some(mask);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct ListParams {
        cluster_id: String,
        limit: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<u32>,
        expand_tasks: bool,
    }

    #[test]
    fn test_query_string_round_trips() {
        let params = ListParams {
            cluster_id: "0123-abc def".to_string(),
            limit: 25,
            offset: None,
            expand_tasks: true,
        };
        let qs = RequestPayload::json(&params).unwrap().query_string().unwrap();
        assert_eq!(qs, "cluster_id=0123-abc+def&expand_tasks=true&limit=25");

        let parsed: ListParams = serde_urlencoded::from_str(&qs).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_query_string_skips_nulls_and_repeats_arrays() {
        let payload = RequestPayload::Json(json!({ "a": null, "ids": [1, 2], "name": "x" }));
        assert_eq!(payload.query_string().unwrap(), "ids=1&ids=2&name=x");
    }

    #[test]
    fn test_query_string_empty() {
        assert_eq!(RequestPayload::Empty.query_string().unwrap(), "");
        assert_eq!(RequestPayload::Json(Value::Null).query_string().unwrap(), "");
    }

    #[test]
    fn test_query_string_rejects_raw_and_nested() {
        let err = RequestPayload::Raw("x=1".to_string()).query_string().unwrap_err();
        assert!(err.downcast_ref::<RequestError>().is_some());

        let err = RequestPayload::Json(json!({ "new_cluster": { "a": 1 } }))
            .query_string()
            .unwrap_err();
        assert!(err.to_string().contains("new_cluster"));

        let err = RequestPayload::Json(json!("scalar")).query_string().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RequestError>(),
            Some(RequestError::UnsupportedPayload(_))
        ));
    }

    #[test]
    fn test_body_encoding() {
        assert!(RequestPayload::Empty.body().unwrap().is_empty());
        assert_eq!(
            RequestPayload::Json(json!({ "k": "v" })).body().unwrap(),
            br#"{"k":"v"}"#.to_vec()
        );
        assert_eq!(
            RequestPayload::Raw("already serialized".to_string()).body().unwrap(),
            b"already serialized".to_vec()
        );
    }

    #[test]
    fn test_query_builder() {
        let mask = SecretsMask::new(["s"]);
        let query = Query::post("/clusters/create")
            .api_version("2.1")
            .header("X-Request", "1")
            .raw_body("{}")
            .mask(&mask);

        assert_eq!(query.method, Method::POST);
        assert_eq!(query.api_version.as_deref(), Some("2.1"));
        assert_eq!(query.headers.get("X-Request").map(String::as_str), Some("1"));
        assert_eq!(query.payload, RequestPayload::Raw("{}".to_string()));
        assert!(query.secrets_mask.is_some());
        assert!(!query.use_raw_path);
    }
}
