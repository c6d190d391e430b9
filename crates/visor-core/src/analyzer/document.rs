use serde_json::{Map, Value};

use crate::error::Error;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// One persisted result document per analyzed frame.
///
/// A failed frame is its own variant so nothing downstream can read an error
/// document as if it were an analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultDocument {
    Analysis {
        payload: Map<String, Value>,
        image_path: String,
        timestamp: String,
    },
    Failed {
        error: String,
        /// The unparsed response text, kept for parse failures only.
        raw_response: Option<String>,
        image_path: String,
        timestamp: String,
    },
}

impl ResultDocument {
    pub fn is_failure(&self) -> bool {
        matches!(self, ResultDocument::Failed { .. })
    }

    pub fn image_path(&self) -> &str {
        match self {
            ResultDocument::Analysis { image_path, .. } => image_path,
            ResultDocument::Failed { image_path, .. } => image_path,
        }
    }

    /// Builds the document for a response body, applying fence extraction.
    pub fn from_response(content: &str, image_path: String, timestamp: String) -> Self {
        match parse_response(content) {
            Ok(payload) => ResultDocument::Analysis {
                payload,
                image_path,
                timestamp,
            },
            Err(e) => {
                let raw_response = match &e {
                    Error::AnalysisParseFailed { raw, .. } => Some(raw.clone()),
                    _ => None,
                };
                ResultDocument::Failed {
                    error: e.to_string(),
                    raw_response,
                    image_path,
                    timestamp,
                }
            }
        }
    }

    /// The on-disk shape: the payload verbatim plus `image_path` and
    /// `timestamp`, or `{error, raw_response?, image_path, timestamp}`.
    pub fn to_json(&self) -> Value {
        match self {
            ResultDocument::Analysis {
                payload,
                image_path,
                timestamp,
            } => {
                let mut map = payload.clone();
                map.insert("image_path".to_string(), Value::String(image_path.clone()));
                map.insert("timestamp".to_string(), Value::String(timestamp.clone()));
                Value::Object(map)
            }
            ResultDocument::Failed {
                error,
                raw_response,
                image_path,
                timestamp,
            } => {
                let mut map = Map::new();
                map.insert("error".to_string(), Value::String(error.clone()));
                if let Some(raw) = raw_response {
                    map.insert("raw_response".to_string(), Value::String(raw.clone()));
                }
                map.insert("image_path".to_string(), Value::String(image_path.clone()));
                map.insert("timestamp".to_string(), Value::String(timestamp.clone()));
                Value::Object(map)
            }
        }
    }

    /// Reads a persisted document back. Anything that is not a JSON object is
    /// rejected; an object carrying `error` is a failed frame.
    pub fn from_json(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err(format!("expected a JSON object, got {}", kind_of(&value)));
        };

        let image_path = take_string(&mut map, "image_path").unwrap_or_default();
        let timestamp = take_string(&mut map, "timestamp").unwrap_or_default();

        if let Some(error) = map.remove("error") {
            let error = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Ok(ResultDocument::Failed {
                error,
                raw_response: take_string(&mut map, "raw_response"),
                image_path,
                timestamp,
            });
        }

        Ok(ResultDocument::Analysis {
            payload: map,
            image_path,
            timestamp,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The JSON object inside a response body. Anything else is an
/// [`Error::AnalysisParseFailed`] carrying the untouched body.
pub fn parse_response(content: &str) -> Result<Map<String, Value>, Error> {
    let failed = |reason: String| Error::AnalysisParseFailed {
        reason,
        raw: content.to_string(),
    };
    match serde_json::from_str::<Value>(extract_json_payload(content)) {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(other) => Err(failed(format!("expected an object, got {}", kind_of(&other)))),
        Err(e) => Err(failed(e.to_string())),
    }
}

/// Picks the JSON text out of a model response: the interior of a block
/// fenced as `json` if there is one, else of the first fenced block, else the
/// raw content.
pub fn extract_json_payload(content: &str) -> &str {
    let lowered = content.to_ascii_lowercase();
    if let Some(start) = lowered.find(JSON_FENCE) {
        return fence_interior(&content[start + JSON_FENCE.len()..]);
    }
    if let Some(start) = content.find(FENCE) {
        return fence_interior(skip_info_string(&content[start + FENCE.len()..]));
    }
    content.trim()
}

/// Text up to the closing fence (or the end, if the block is unterminated).
fn fence_interior(after_open: &str) -> &str {
    let end = after_open.find(FENCE).unwrap_or(after_open.len());
    after_open[..end].trim()
}

/// Drops a language tag such as `text` or `js` directly after an opening fence.
fn skip_info_string(after_open: &str) -> &str {
    match after_open.split_once('\n') {
        Some((tag, rest))
            if !tag.trim().is_empty()
                && tag
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+')) =>
        {
            rest
        }
        _ => after_open,
    }
}
