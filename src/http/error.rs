//! Error payloads returned by the control plane and their normalized form.

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::LazyLock;

static ENDPOINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/api/2\.0/([^/]+)/([^/]+)$").expect("valid endpoint regex"));

static PRE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<pre>(.*)</pre>").expect("valid <pre> regex"));

const DOCS_BASE_URL: &str = "https://docs.databricks.com/dev-tools/api/latest";

/// Error body as sent by the REST API. `detail`/`status` are only set by the
/// SCIM endpoints (RFC 7644, section 3.12).
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "detail")]
    pub scim_detail: Option<String>,
    #[serde(default, rename = "status")]
    pub scim_status: Option<String>,
}

/// Normalized API error, whatever the shape of the failure body was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub error_code: String,
    pub message: String,
    /// Path of the request that failed.
    pub resource: String,
    pub status_code: u16,
}

impl ApiError {
    /// True for HTTP 404.
    pub fn is_missing(&self) -> bool {
        self.status_code == StatusCode::NOT_FOUND.as_u16()
    }

    /// Guesses the documentation page for `/api/2.0/<category>/<action>`
    /// resources. Empty for anything else.
    pub fn documentation_url(&self) -> String {
        match ENDPOINT_RE.captures(&self.resource) {
            Some(caps) => format!("{}/{}.html#{}", DOCS_BASE_URL, &caps[1], &caps[2]),
            None => String::new(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let docs = self.documentation_url();
        if docs.is_empty() {
            write!(
                f,
                "{}\n({} on {})",
                self.message, self.status_code, self.resource
            )
        } else {
            write!(
                f,
                "{}\nPlease consult API docs at {} for details.",
                self.message, docs
            )
        }
    }
}

impl std::error::Error for ApiError {}

/// Turns a failed response into an [`ApiError`].
///
/// JSON bodies are decoded as [`ApiErrorBody`]. Anything else is treated as an
/// HTML error page from an intermediary: the code comes from the status reason
/// phrase and the message from the first `<pre>` block. When there is no such
/// block the whole body ends up in a generic message.
pub fn parse_error_response(body: &[u8], status: StatusCode, resource: &str) -> ApiError {
    classify_error_response(body, status, resource).0
}

/// Same as [`parse_error_response`]. The flag is false when the body was not
/// recognized and the generic message was built; such errors are never retried.
pub(crate) fn classify_error_response(
    body: &[u8],
    status: StatusCode,
    resource: &str,
) -> (ApiError, bool) {
    let mut error_body = match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) => parsed,
        Err(decode_err) => {
            let error_code = error_code_from_status(status);
            let text = String::from_utf8_lossy(body);
            let Some(caps) = PRE_BLOCK_RE.captures(&text) else {
                let error = ApiError {
                    error_code,
                    message: format!(
                        "Response from server ({}) {}: {}",
                        status.as_u16(),
                        text,
                        decode_err
                    ),
                    resource: resource.to_string(),
                    status_code: status.as_u16(),
                };
                return (error, false);
            };
            ApiErrorBody {
                error_code: Some(error_code),
                message: Some(trim_space_and_dots(&caps[1]).to_string()),
                ..Default::default()
            }
        }
    };

    let mut api_error = ApiError {
        error_code: error_body.error_code.take().unwrap_or_default(),
        message: error_body.message.take().unwrap_or_default(),
        resource: resource.to_string(),
        status_code: status.as_u16(),
    };

    if api_error.message.is_empty() {
        if let Some(detail) = error_body.scim_detail.filter(|d| !d.is_empty()) {
            api_error.message = if detail == "null" {
                "SCIM API Internal Error".to_string()
            } else {
                detail
            };
            api_error.error_code =
                format!("SCIM_{}", error_body.scim_status.unwrap_or_default());
        }
    }

    (api_error, true)
}

/// "404 Not Found" -> "NOT_FOUND"; "UNKNOWN" without a reason phrase.
fn error_code_from_status(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => trim_space_and_dots(reason)
            .to_uppercase()
            .replace(' ', "_"),
        None => "UNKNOWN".to_string(),
    }
}

fn trim_space_and_dots(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn test_parse_json_error() {
        let body = br#"{"error_code":"INVALID_PARAMETER_VALUE","message":"Cluster 42 does not exist"}"#;
        let err = parse_error_response(body, status(400), "/api/2.0/clusters/get");

        assert_eq!(err.error_code, "INVALID_PARAMETER_VALUE");
        assert_eq!(err.message, "Cluster 42 does not exist");
        assert_eq!(err.status_code, 400);
        assert_eq!(err.resource, "/api/2.0/clusters/get");
    }

    #[test]
    fn test_parse_scim_error() {
        let body = br#"{"detail":"User already exists","status":"409"}"#;
        let err = parse_error_response(body, status(409), "/api/2.0/preview/scim/v2/Users");

        assert_eq!(err.message, "User already exists");
        assert_eq!(err.error_code, "SCIM_409");
    }

    #[test]
    fn test_parse_scim_null_detail() {
        let body = br#"{"detail":"null","status":"500"}"#;
        let err = parse_error_response(body, status(500), "/api/2.0/preview/scim/v2/Groups");

        assert_eq!(err.message, "SCIM API Internal Error");
        assert_eq!(err.error_code, "SCIM_500");
    }

    #[test]
    fn test_scim_detail_ignored_when_message_present() {
        let body = br#"{"error_code":"X","message":"real message","detail":"other"}"#;
        let err = parse_error_response(body, status(400), "/x");

        assert_eq!(err.message, "real message");
        assert_eq!(err.error_code, "X");
    }

    #[test]
    fn test_parse_html_pre_block() {
        let body = b"<html><body><h2>HTTP ERROR 503</h2><pre>  Service temporarily unavailable. </pre></body></html>";
        let err = parse_error_response(body, status(503), "/api/2.0/jobs/list");

        assert_eq!(err.message, "Service temporarily unavailable");
        assert_eq!(err.error_code, "SERVICE_UNAVAILABLE");
        assert_eq!(err.status_code, 503);
    }

    #[test]
    fn test_parse_unrecognized_body() {
        let err = parse_error_response(b"Bad Gateway", status(502), "/api/2.0/jobs/list");

        assert_eq!(err.error_code, "BAD_GATEWAY");
        assert!(err.message.contains("502"));
        assert!(err.message.contains("Bad Gateway"));
        assert!(err.message.starts_with("Response from server (502) Bad Gateway: "));
    }

    #[test]
    fn test_classify_flags_unrecognized_body() {
        let (_, recognized) = classify_error_response(b"Bad Gateway", status(502), "/x");
        assert!(!recognized);

        let (_, recognized) =
            classify_error_response(b"<pre>Service unavailable</pre>", status(503), "/x");
        assert!(recognized);

        let (_, recognized) = classify_error_response(br#"{"message":"m"}"#, status(400), "/x");
        assert!(recognized);
    }

    #[test]
    fn test_parse_empty_404_is_missing() {
        let err = parse_error_response(b"", status(404), "/api/2.0/clusters/get");

        assert!(err.is_missing());
        assert_eq!(err.error_code, "NOT_FOUND");
    }

    #[test]
    fn test_unknown_status_reason() {
        let err = parse_error_response(b"", status(599), "/x");
        assert_eq!(err.error_code, "UNKNOWN");
    }

    #[test]
    fn test_documentation_url() {
        let err = ApiError {
            error_code: String::new(),
            message: "boom".to_string(),
            resource: "/api/2.0/clusters/create".to_string(),
            status_code: 400,
        };
        assert_eq!(
            err.documentation_url(),
            "https://docs.databricks.com/dev-tools/api/latest/clusters.html#create"
        );
        assert_eq!(
            err.to_string(),
            "boom\nPlease consult API docs at https://docs.databricks.com/dev-tools/api/latest/clusters.html#create for details."
        );
    }

    #[test]
    fn test_documentation_url_requires_exact_shape() {
        for resource in [
            "/api/2.0/clusters",
            "/api/2.0/preview/scim/v2/Users",
            "/api/1.2/clusters/create",
            "/api/2.0/clusters/create/",
        ] {
            let err = ApiError {
                error_code: String::new(),
                message: "boom".to_string(),
                resource: resource.to_string(),
                status_code: 500,
            };
            assert_eq!(err.documentation_url(), "", "resource {}", resource);
        }
    }

    #[test]
    fn test_display_without_docs() {
        let err = ApiError {
            error_code: "NOT_FOUND".to_string(),
            message: "gone".to_string(),
            resource: "/api/2.0/preview/scim/v2/Users".to_string(),
            status_code: 404,
        };
        assert_eq!(err.to_string(), "gone\n(404 on /api/2.0/preview/scim/v2/Users)");
    }
}
