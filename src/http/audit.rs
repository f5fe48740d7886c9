//! Audit records for outbound requests.

use log::info;
use serde_json::{Map, Value};

use crate::mask::SecretsMask;

/// Upper bound on a logged audit record, in bytes.
pub const AUDIT_RECORD_MAX_BYTES: usize = 1000;

/// Logs a GET request. The query string is already part of `uri`.
pub fn audit_get_payload(uri: &str, mask: Option<&SecretsMask>) -> String {
    let record = audit_record("GET", uri, None);
    emit(record, mask)
}

/// Logs a mutating request along with its payload.
pub fn audit_non_get_payload(
    method: &str,
    uri: &str,
    payload: &Value,
    mask: Option<&SecretsMask>,
) -> String {
    let record = audit_record(method, uri, Some(payload));
    emit(record, mask)
}

fn audit_record(method: &str, uri: &str, payload: Option<&Value>) -> Value {
    let mut record = Map::new();
    record.insert("Method".to_string(), Value::String(method.to_string()));
    record.insert("URI".to_string(), Value::String(uri.to_string()));
    if let Some(payload) = payload {
        record.insert("Payload".to_string(), payload.clone());
    }
    Value::Object(record)
}

fn emit(record: Value, mask: Option<&SecretsMask>) -> String {
    let line = match mask {
        Some(mask) => mask.mask_string(&mask.mask_value(&record).to_string()),
        None => record.to_string(),
    };
    let line = only_n_bytes(&line, AUDIT_RECORD_MAX_BYTES);
    info!("{}", line);
    line
}

/// Keeps at most `n` bytes. A character that would be split is dropped whole.
fn only_n_bytes(s: &str, n: usize) -> String {
    s[..s.floor_char_boundary(n)].to_string()
}
