use serde_json::Value;

use crate::error::PennsieveError;

pub(crate) fn opt_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn require_string(value: &Value, key: &str) -> Result<String, PennsieveError> {
    opt_string(value, key).ok_or_else(|| PennsieveError::Json(format!("missing field '{key}'")))
}

pub(crate) fn opt_i64(value: &Value, key: &str) -> Option<i64> {
    let field = value.get(key)?;
    field
        .as_i64()
        .or_else(|| field.as_f64().map(|number| number as i64))
        .or_else(|| field.as_str().and_then(|text| text.parse().ok()))
}

pub(crate) fn opt_f64(value: &Value, key: &str) -> Option<f64> {
    let field = value.get(key)?;
    field
        .as_f64()
        .or_else(|| field.as_str().and_then(|text| text.parse().ok()))
}

pub(crate) fn opt_bool(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(|field| field.as_array())
        .map(|items| items.as_slice())
        .unwrap_or(&[])
}

pub(crate) fn as_list(value: &Value) -> Result<&[Value], PennsieveError> {
    value
        .as_array()
        .map(|items| items.as_slice())
        .ok_or_else(|| PennsieveError::Json("expected a JSON array".to_string()))
}

pub(crate) fn segment(raw: &str) -> String {
    // ':' is a valid path character and appears in every node id.
    urlencoding::encode(raw).replace("%3A", ":")
}
