//! Vision response decoding.
//!
//! A response payload is probed once into a [`VisionPayload`]; downstream
//! code matches on the variant instead of re-probing fields. Candidate shapes
//! are tried in a fixed order and the first match wins:
//!
//! 1. a plain string (a JSON string, or a body that is not JSON at all)
//! 2. an object with a string `content` field
//! 3. an object with a string `markdown` field
//! 4. a chat-completion object: `choices[0].message.content`
//!
//! Anything else is [`VisionPayload::Unrecognized`], which means "no
//! markdown extracted" and is not an error.

use serde_json::Value;
use tracing::debug;

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionPayload {
    PlainText(String),
    FieldContent(String),
    FieldMarkdown(String),
    ChatCompletionChoice(String),
    Unrecognized,
}

impl VisionPayload {
    /// Probe a raw response body.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(&value),
            Err(_) if raw.trim().is_empty() => VisionPayload::Unrecognized,
            Err(_) => VisionPayload::PlainText(raw.to_string()),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        if let Some(s) = value.as_str() {
            return VisionPayload::PlainText(s.to_string());
        }
        if let Some(s) = value.get("content").and_then(Value::as_str) {
            return VisionPayload::FieldContent(s.to_string());
        }
        if let Some(s) = value.get("markdown").and_then(Value::as_str) {
            return VisionPayload::FieldMarkdown(s.to_string());
        }
        let choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str);
        if let Some(s) = choice {
            return VisionPayload::ChatCompletionChoice(s.to_string());
        }
        VisionPayload::Unrecognized
    }

    /// The extracted text, if any shape matched.
    pub fn text(&self) -> Option<&str> {
        match self {
            VisionPayload::PlainText(s)
            | VisionPayload::FieldContent(s)
            | VisionPayload::FieldMarkdown(s)
            | VisionPayload::ChatCompletionChoice(s) => Some(s),
            VisionPayload::Unrecognized => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            VisionPayload::PlainText(s)
            | VisionPayload::FieldContent(s)
            | VisionPayload::FieldMarkdown(s)
            | VisionPayload::ChatCompletionChoice(s) => Some(s),
            VisionPayload::Unrecognized => None,
        }
    }
}

/// `usage.total_tokens` from a response body.
///
/// Missing or malformed usage is advisory: it is logged and yields `None`.
pub fn total_tokens(raw: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let usage = value.get("usage")?;
    match usage.get("total_tokens").and_then(Value::as_u64) {
        Some(n) => Some(n),
        None => {
            debug!("usage present but total_tokens missing or not an integer");
            None
        }
    }
}
