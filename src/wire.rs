//! Lenient field decoding for backend payloads.
//!
//! The backend is not strict about JSON types: ids arrive as strings or
//! numbers, counts as integers, floats or numeric strings. These helpers are
//! used with `#[serde(default, deserialize_with = "...")]` so that a single
//! odd field degrades to `None` instead of failing the whole response.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Extracts an identifier from a JSON scalar.
///
/// Strings are trimmed (empty means absent), numbers keep their JSON text.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Extracts a non-negative count. Negative values clamp to 0, fractions are
/// truncated.
pub fn count_from_value(value: &Value) -> Option<u32> {
    let raw = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.max(0.0).min(u32::MAX as f64) as u32)
}

/// Extracts a boolean; accepts `true`/`false`, their string forms and 0/1.
pub fn bool_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_i64().map(|n| n != 0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}

/// First entry of a candidate list (or a lone value). An unusable first
/// entry yields `None`; later entries are never promoted.
pub fn lenient_first_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(entries)) => entries.first().and_then(id_from_value),
        Some(single) => id_from_value(&single),
        None => None,
    })
}

pub fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

pub fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(bool_from_value))
}

/// Free text; blank strings count as absent, non-strings are ignored.
pub fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        _ => None,
    })
}
