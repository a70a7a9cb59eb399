//! Extraction of structured payloads from free-form model output.
//!
//! Models frequently wrap JSON in markdown fences or surround it with prose.
//! [`extract_structured`] strips that wrapping and deserializes the payload,
//! reporting failure as a value so callers can fall back locally.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("model response was empty")]
    Empty,
    #[error("no JSON object found in model response")]
    NoPayload,
    #[error("malformed model payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Removes a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parses the first JSON object embedded in `raw`.
pub fn extract_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ResponseError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ResponseError::Empty);
    }
    if let Ok(value) = serde_json::from_str::<T>(body) {
        return Ok(value);
    }
    let start = body.find('{').ok_or(ResponseError::NoPayload)?;
    let end = body.rfind('}').ok_or(ResponseError::NoPayload)?;
    if end < start {
        return Err(ResponseError::NoPayload);
    }
    Ok(serde_json::from_str(&body[start..=end])?)
}
