//! Redaction of known secret values before anything reaches a log sink.

use log::warn;
use regex::{NoExpand, Regex};
use serde_json::Value;

/// Replacement text for every redacted secret.
pub const MASK_PLACEHOLDER: &str = "[REDACTED]";

/// A set of literal secret values to redact.
#[derive(Debug, Clone, Default)]
pub struct SecretsMask {
    // Longest first, so a secret containing another secret is replaced whole.
    secrets: Vec<String>,
    // Placeholder, then every secret, as one alternation. `None` when empty.
    pattern: Option<Regex>,
}

impl SecretsMask {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mask = Self::default();
        for secret in secrets {
            mask.add(secret);
        }
        mask
    }

    /// Registers another secret. Empty values are ignored.
    pub fn add(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() || self.secrets.contains(&secret) {
            return;
        }
        self.secrets.push(secret);
        self.secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        self.pattern = build_pattern(&self.secrets);
    }

    pub fn merge(&mut self, other: &SecretsMask) {
        for secret in &other.secrets {
            self.add(secret.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Replaces every occurrence of every secret in `text` in a single pass.
    /// Placeholders already present are left alone, so masking twice gives
    /// the same result as masking once.
    pub fn mask_string(&self, text: &str) -> String {
        if self.secrets.is_empty() {
            return text.to_string();
        }
        match &self.pattern {
            Some(re) => re.replace_all(text, NoExpand(MASK_PLACEHOLDER)).into_owned(),
            None => {
                let mut masked = text.to_string();
                for secret in &self.secrets {
                    masked = masked.replace(secret.as_str(), MASK_PLACEHOLDER);
                }
                masked
            }
        }
    }

    /// Returns a copy of `value` with secrets removed from every string leaf.
    /// Object keys are left as-is.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.mask_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.mask_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn build_pattern(secrets: &[String]) -> Option<Regex> {
    let alternation = std::iter::once(MASK_PLACEHOLDER)
        .chain(secrets.iter().map(String::as_str))
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&alternation) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Secrets mask falls back to sequential replacement: {}", e);
            None
        }
    }
}
