//! Coercion of loosely typed result-document fields into column values.

use serde_json::{Map, Value};

pub const MISSING_PPE: &str = "Missing PPE";
pub const DANGEROUS_POSITION: &str = "Dangerous Position";
pub const IMPROPER_EQUIPMENT: &str = "Improper Equipment Usage";
pub const BLOCKED_EXIT: &str = "Blocked Exit/Pathway";
pub const OTHER_HAZARD: &str = "Other Hazard";

/// Keyword groups in match priority. The first group with any keyword
/// contained in the lowercased text decides the type.
const KEYWORD_GROUPS: [(&[&str], &str); 4] = [
    (&["ppe", "hard hat", "safety gear"], MISSING_PPE),
    (&["position", "height", "fall"], DANGEROUS_POSITION),
    (&["equipment", "tool", "machinery"], IMPROPER_EQUIPMENT),
    (&["exit", "pathway", "block"], BLOCKED_EXIT),
];

/// `"Type: details"` yields `"Type"`; otherwise the type comes from the
/// keyword groups, falling back to [`OTHER_HAZARD`].
pub fn infer_violation_type(text: &str) -> String {
    if let Some((prefix, _)) = text.split_once(':') {
        return prefix.trim().to_string();
    }

    let lowered = text.to_lowercase();
    KEYWORD_GROUPS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(_, label)| *label)
        .unwrap_or(OTHER_HAZARD)
        .to_string()
}

/// Strings verbatim, scalars stringified, `null` as `None`. Arrays and
/// objects keep their JSON text.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Text of one `violations` entry. A model occasionally answers with objects
/// instead of strings; their `description` is used when present.
pub fn violation_text(value: &Value) -> String {
    match value {
        Value::Object(map) => match map.get("description") {
            Some(Value::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        other => coerce_text(other).unwrap_or_default(),
    }
}

/// Severity and confidence: trimmed, lowercased, and `None` when absent or blank.
pub fn normalize_level(value: Option<&Value>) -> Option<String> {
    value
        .and_then(coerce_text)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// `worker_count` as an integer: accepts integers, integral floats and
/// numeric strings.
pub fn coerce_count(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A worker's violation reference: a non-negative integer or numeric string.
pub fn coerce_index(value: &Value) -> Option<i64> {
    let index = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (index >= 0).then_some(index)
}

/// Entry `index` of the array under `key`, if both exist.
pub fn array_entry<'a>(payload: &'a Map<String, Value>, key: &str, index: usize) -> Option<&'a Value> {
    payload.get(key)?.as_array()?.get(index)
}

/// The array under `key`, or an empty slice when missing or not an array.
pub fn array_field<'a>(payload: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
