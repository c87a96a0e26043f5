//! Conversions between command-line JSON and CBOR arguments.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rembus::{Arg, Value};
use serde_json::{Map, Number, Value as Json};

/// Parses a command-line argument as JSON, falling back to a plain string.
///
/// `42` becomes an integer, `"42"` and `hello` become text.
pub fn parse_arg(raw: &str) -> Arg {
    match serde_json::from_str::<Json>(raw) {
        Ok(json) => Arg::Data(json_to_value(json)),
        Err(_) => Arg::from(raw),
    }
}

pub fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Text(s),
        Json::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        Json::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (Value::Text(k), json_to_value(v)))
                .collect(),
        ),
    }
}

/// Renders a CBOR value as JSON for display.
///
/// Byte strings are base64 encoded; tags are unwrapped.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => {
            let n = i128::from(*i);
            if let Ok(v) = i64::try_from(n) {
                Json::from(v)
            } else if let Ok(v) = u64::try_from(n) {
                Json::from(v)
            } else {
                Json::String(n.to_string())
            }
        }
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::String(BASE64.encode(bytes)),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Text(s) => s.clone(),
                    other => value_to_json(other).to_string(),
                };
                map.insert(key, value_to_json(v));
            }
            Json::Object(map)
        }
        Value::Tag(_, inner) => value_to_json(inner),
        _ => Json::Null,
    }
}

/// Renders an argument, summarising tables by shape.
pub fn arg_to_json(arg: &Arg) -> Json {
    match arg {
        Arg::Data(value) => value_to_json(value),
        Arg::Table(table) => {
            let columns: Vec<Json> = table
                .schema()
                .fields()
                .iter()
                .map(|f| Json::String(f.name().clone()))
                .collect();
            serde_json::json!({
                "table": {
                    "columns": columns,
                    "rows": table.num_rows(),
                }
            })
        }
    }
}
