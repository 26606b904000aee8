use serde_json::Value;
use thiserror::Error;

/// Errors raised while building, confirming, cancelling or amending documents.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComprobanteError {
    /// Input failed validation before any external call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Malformed numbering method or fiscal number.
    #[error("format error: {0}")]
    Format(String),

    /// The same item appears on several lines with divergent upstream links,
    /// or the document is already being amended.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation not valid in the document's current state.
    #[error("document {name} is {actual}, expected {expected}")]
    InvalidState {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Referenced document does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unclassified failure reported by the ERP, passed through verbatim.
    #[error(transparent)]
    External(#[from] ExternalError),

    /// Amend could not cancel the original; the replacement was rolled back
    /// (or not, see `rolled_back`).
    #[error("amend of {original} aborted (replacement {replacement}, rolled back: {rolled_back}): {source}")]
    AmendAborted {
        original: String,
        replacement: String,
        rolled_back: bool,
        #[source]
        source: Box<ComprobanteError>,
    },

    /// Client or settings misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// A single validation finding with field path and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "lines.2.warehouse").
    pub field: String,
    /// Human-readable error description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Collapse a list of findings into one [`ComprobanteError::Validation`].
    pub fn into_error(errors: &[ValidationError]) -> ComprobanteError {
        let msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        ComprobanteError::Validation(msg)
    }
}

/// Error reported by the ERP (or by the transport in front of it).
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ExternalError {
    /// HTTP status, `None` for transport failures.
    pub status: Option<u16>,
    /// Upstream exception class (e.g. "NegativeStockError").
    pub exc_type: Option<String>,
    /// User-facing messages with markup stripped.
    pub messages: Vec<String>,
    /// Raw error body.
    pub body: Value,
}

impl ExternalError {
    pub fn new(status: u16, exc_type: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: Some(status),
            exc_type: exc_type.map(str::to_string),
            body: serde_json::json!({ "exc_type": exc_type, "message": message }),
            messages: vec![message],
        }
    }

    /// Network-level failure (connect, timeout, unreadable body).
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: None,
            exc_type: None,
            body: Value::Null,
            messages: vec![message],
        }
    }

    /// Parse an error body from the document API.
    ///
    /// Understands `exc_type`, `exception`, `message` and `_server_messages`
    /// (a JSON-encoded list of JSON-encoded `{ "message": ... }` objects).
    /// Bodies that are not JSON are kept as a single message.
    pub fn from_body(status: u16, body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            let text = strip_markup(body);
            return Self {
                status: Some(status),
                exc_type: None,
                messages: if text.is_empty() { Vec::new() } else { vec![text] },
                body: Value::String(body.to_string()),
            };
        };

        let mut messages = Vec::new();
        if let Some(raw) = value.get("_server_messages").and_then(Value::as_str) {
            if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
                for entry in list {
                    let msg = serde_json::from_str::<Value>(&entry)
                        .ok()
                        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                        .unwrap_or(entry);
                    push_message(&mut messages, &msg);
                }
            }
        }
        for key in ["message", "exception"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                push_message(&mut messages, text);
            }
        }

        Self {
            status: Some(status),
            exc_type: value
                .get("exc_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            messages,
            body: value,
        }
    }

    /// All messages joined, for matching and display.
    pub fn text(&self) -> String {
        self.messages.join("\n")
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404) || self.exc_type.as_deref() == Some("DoesNotExistError")
    }

    pub fn is_duplicate(&self) -> bool {
        self.status == Some(409) || self.exc_type.as_deref() == Some("DuplicateEntryError")
    }

    /// Optimistic-concurrency rejection: the record changed since it was read.
    pub fn is_timestamp_mismatch(&self) -> bool {
        self.exc_type.as_deref() == Some("TimestampMismatchError")
    }
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "ERP error (HTTP {status}")?,
            None => write!(f, "ERP error (transport")?,
        }
        if let Some(exc) = &self.exc_type {
            write!(f, ", {exc}")?;
        }
        write!(f, "): {}", self.text())
    }
}

fn push_message(messages: &mut Vec<String>, raw: &str) {
    let text = strip_markup(raw);
    if !text.is_empty() && !messages.contains(&text) {
        messages.push(text);
    }
}

/// Remove HTML tags and collapse whitespace.
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
