//! Per-item response records from a batch output file
//!
//! Each output line looks like
//!
//! ```text
//! {"id": "...", "custom_id": "row0001",
//!  "response": {"status_code": 200, "body": {...}}, "error": null}
//! ```
//!
//! Some producers hand back `body` as a JSON-encoded string; it is decoded
//! when possible so callers always see structured data.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::correlation::CorrelationId;

#[derive(Debug, Deserialize)]
struct OutputLine {
    custom_id: CorrelationId,
    #[serde(default)]
    response: Option<OutputResponse>,
    #[serde(default)]
    error: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    status_code: u16,
    #[serde(default)]
    body: JsonValue,
}

/// One downloaded response, before payload extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub correlation_id: CorrelationId,
    pub success: bool,
    pub status_code: Option<u16>,
    pub raw_body: JsonValue,
}

impl ResponseRecord {
    /// Parse one raw output line.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let parsed: OutputLine = serde_json::from_str(line).map_err(|e| e.to_string())?;

        let has_error = parsed.error.as_ref().is_some_and(|e| !e.is_null());
        let (status_code, raw_body) = match parsed.response {
            Some(response) => (Some(response.status_code), decode_body(response.body)),
            None => (None, JsonValue::Null),
        };

        Ok(Self {
            correlation_id: parsed.custom_id,
            success: status_code == Some(200) && !has_error,
            status_code,
            raw_body,
        })
    }

    /// The model's text content (`choices[0].message.content`).
    pub fn content(&self) -> Option<&str> {
        self.raw_body
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
    }
}

fn decode_body(body: JsonValue) -> JsonValue {
    match body {
        JsonValue::String(text) => serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(custom_id: &str, status: u16, content: &str) -> String {
        json!({
            "id": "batch_req_1",
            "custom_id": custom_id,
            "response": {
                "status_code": status,
                "body": {"choices": [{"message": {"role": "assistant", "content": content}}]}
            },
            "error": null
        })
        .to_string()
    }

    #[test]
    fn successful_line() {
        let record = ResponseRecord::parse_line(&line("row0001", 200, "{\"a\":1}")).unwrap();
        assert_eq!(record.correlation_id.as_str(), "row0001");
        assert!(record.success);
        assert_eq!(record.content(), Some("{\"a\":1}"));
    }

    #[test]
    fn non_200_is_not_success() {
        let record = ResponseRecord::parse_line(&line("row0001", 429, "")).unwrap();
        assert!(!record.success);
        assert_eq!(record.status_code, Some(429));
    }

    #[test]
    fn error_object_is_not_success() {
        let text = json!({
            "custom_id": "row0002",
            "response": null,
            "error": {"code": "server_error", "message": "boom"}
        })
        .to_string();
        let record = ResponseRecord::parse_line(&text).unwrap();
        assert!(!record.success);
        assert_eq!(record.content(), None);
    }

    #[test]
    fn string_encoded_body_is_decoded() {
        let body = json!({"choices": [{"message": {"content": "hi"}}]}).to_string();
        let text = json!({
            "custom_id": "row0003",
            "response": {"status_code": 200, "body": body}
        })
        .to_string();
        let record = ResponseRecord::parse_line(&text).unwrap();
        assert_eq!(record.content(), Some("hi"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ResponseRecord::parse_line("not json").is_err());
        assert!(ResponseRecord::parse_line("{\"response\": {}}").is_err());
    }
}
