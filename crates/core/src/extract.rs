//! Recovering a JSON structure from model text
//!
//! Models are asked for bare JSON but regularly wrap it in markdown fences or
//! surround it with prose. Extraction trims the text (including a leading
//! byte-order mark), strips a fence only when it opens or closes the trimmed
//! text, then takes the first balanced structure of the expected shape that
//! decodes as JSON. The bracket scan is string-aware, so a `]` inside a
//! quoted value never ends the structure early, and it stops at the matching
//! bracket, so trailing prose or a second structure is never swallowed.

use serde_json::Value as JsonValue;

/// Shape of the structure a stage expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

impl Shape {
    fn delimiters(self) -> (char, char) {
        match self {
            Shape::Object => ('{', '}'),
            Shape::Array => ('[', ']'),
        }
    }
}

/// Strip a markdown code fence that opens and/or closes the trimmed text.
///
/// Fences in the middle of the text are left alone.
pub fn strip_fences(text: &str) -> &str {
    let mut trimmed = text.trim_start_matches('\u{feff}').trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip the language tag (`json`, `JSON`, ...) up to the first whitespace
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        trimmed = rest[tag_len..].trim_start();
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest.trim_end();
    }
    trimmed
}

/// Find the end (exclusive byte offset) of the balanced structure starting
/// at `start`, which must hold the opening delimiter.
fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first structure of the given shape from model text.
///
/// Returns a human-readable reason when nothing usable is found; callers
/// attach the correlation id.
pub fn extract_structure(text: &str, shape: Shape) -> Result<JsonValue, String> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Err("response content is empty".to_string());
    }

    let (open, close) = shape.delimiters();
    let mut truncated = false;

    for (start, _) in body.match_indices(open) {
        match balanced_end(body, start, open, close) {
            Some(end) => {
                if let Ok(value) = serde_json::from_str::<JsonValue>(&body[start..end]) {
                    return Ok(value);
                }
            }
            None => truncated = true,
        }
    }

    let what = match shape {
        Shape::Object => "JSON object",
        Shape::Array => "JSON array",
    };
    if truncated {
        Err(format!("{what} is unterminated (truncated response?)"))
    } else {
        Err(format!("no {what} found in response"))
    }
}
