use serde_json::{Map, Value};

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn arr_field<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value.get(key).and_then(Value::as_array)
}

pub(crate) fn copy_field(src: &Value, dst: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = src.get(from)
        && !value.is_null()
    {
        dst.insert(to.to_string(), value.clone());
    }
}

pub(crate) fn first_number(src: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|key| src.get(*key))
        .find(|value| value.is_number())
        .cloned()
}

/// Parses a string either as a JSON object or falls back to wrapping it.
pub(crate) fn parse_args(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
