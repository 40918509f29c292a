// Defensive payload coercion for client messages.
//
// The relay has no error channel back to a sender, so a malformed payload is
// coerced or defaulted instead of rejected. Two layers:
//
// - Field level: `identifier` and `duration_ms` are `deserialize_with` hooks
//   that accept any JSON value and map the unusable ones to `None`. A number
//   sent where a sound id was expected is stringified; a numeric string sent
//   where a duration was expected is parsed.
// - Message level: `normalize_client_value` rewrites the shorthand shapes a
//   hand-written client tends to produce (`"fadeOut"` with no body,
//   `{"playSound": "rain"}` with a positional argument) into the canonical
//   externally-tagged form before serde sees them.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Deserialize an identifier (sound id, story-mode id) from any JSON value.
pub fn identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_identifier(&value))
}

/// Deserialize a millisecond duration from any JSON value.
pub fn duration_ms<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_duration(&value))
}

/// Non-blank strings pass through trimmed; numbers are stringified.
pub fn coerce_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-negative finite numbers (or numeric strings) round to whole
/// milliseconds. Everything else, including NaN-producing strings, is `None`.
pub fn coerce_duration(value: &Value) -> Option<u64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw.is_finite() && raw >= 0.0 {
        Some(raw.round() as u64)
    } else {
        None
    }
}

/// Client variants that carry exactly one payload field, with that field's
/// wire name. Used to expand shorthand forms.
const SINGLE_FIELD_VARIANTS: &[(&str, &str)] = &[
    ("playSound", "soundId"),
    ("fadeOut", "durationMs"),
    ("changeStoryMode", "modeId"),
];

/// Client variants with no payload. Any body sent with them is discarded.
const UNIT_VARIANTS: &[&str] = &["stopAll", "requestState", "goodbye"];

/// Rewrite shorthand client message shapes into canonical form.
pub fn normalize_client_value(value: Value) -> Value {
    match value {
        Value::String(name) => match field_for(&name) {
            Some(_) => single_entry(name, Value::Object(Map::new())),
            None => Value::String(name),
        },
        Value::Object(map) if map.len() == 1 => {
            let Some((name, payload)) = map.into_iter().next() else {
                return Value::Object(Map::new());
            };
            if UNIT_VARIANTS.contains(&name.as_str()) {
                return Value::String(name);
            }
            match (field_for(&name), payload) {
                (Some(_), payload @ Value::Object(_)) => single_entry(name, payload),
                (Some(_), Value::Null) => single_entry(name, Value::Object(Map::new())),
                (Some(field), positional) => {
                    let body = single_entry(field.to_string(), positional);
                    single_entry(name, body)
                }
                (None, payload) => single_entry(name, payload),
            }
        }
        other => other,
    }
}

fn field_for(variant: &str) -> Option<&'static str> {
    SINGLE_FIELD_VARIANTS
        .iter()
        .find(|(name, _)| *name == variant)
        .map(|(_, field)| *field)
}

fn single_entry(key: String, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key, value);
    Value::Object(map)
}
