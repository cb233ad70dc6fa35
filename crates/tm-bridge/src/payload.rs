//! Normalisation of caller-supplied JSON.
//!
//! Callers may pass an object either inline or as a JSON-encoded string. The
//! helpers here coerce both shapes into a [`JsonObject`] and reject anything
//! else with an `E_INPUT` error before any workspace or process exists.

use std::io::Read;

use serde_json::{Map, Value};

use crate::error::{BridgeError, error_data};

/// A JSON object keyed by field name.
pub type JsonObject = Map<String, Value>;

/// Reads the request payload from `reader`.
///
/// Whitespace-only input is treated as an empty object.
///
/// # Errors
///
/// Returns an `E_INPUT` error when the input cannot be read, is not valid
/// JSON, or is not a JSON object.
pub fn read_payload(mut reader: impl Read) -> Result<JsonObject, BridgeError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw).map_err(|error| {
        BridgeError::input("STDIN could not be read.")
            .with_data(error_data([("error", Value::from(error.to_string()))]))
    })?;
    parse_payload(&raw)
}

/// Parses a request payload from raw text.
///
/// # Errors
///
/// Returns an `E_INPUT` error when `raw` is not valid JSON or is not a JSON
/// object.
pub fn parse_payload(raw: &str) -> Result<JsonObject, BridgeError> {
    if raw.trim().is_empty() {
        return Ok(JsonObject::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(|error| {
        BridgeError::input("STDIN must contain valid JSON.")
            .with_data(error_data([("error", Value::from(error.to_string()))]))
    })?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(BridgeError::input("STDIN payload must be a JSON object.")
            .with_data(error_data([("type", Value::from(json_type_name(&other)))]))),
    }
}

/// Looks up `key`, treating an explicit `null` as absent.
#[must_use]
pub fn field<'a>(payload: &'a JsonObject, key: &str) -> Option<&'a Value> {
    payload.get(key).filter(|value| !value.is_null())
}

/// Normalises a required object field.
///
/// # Errors
///
/// Returns an `E_INPUT` error when the field is absent, is a string that is
/// not valid JSON, or does not hold an object.
pub fn require_object(name: &str, value: Option<&Value>) -> Result<JsonObject, BridgeError> {
    let Some(present) = value else {
        return Err(BridgeError::input(format!("{name} is required.")));
    };
    coerce_object(name, present)
}

/// Normalises an optional object field.
///
/// Returns `Ok(None)` when the field was not provided, which callers must
/// keep distinct from a provided empty object.
///
/// # Errors
///
/// Returns an `E_INPUT` error when the field is present but is not an object
/// or a string encoding one.
pub fn optional_object(name: &str, value: Option<&Value>) -> Result<Option<JsonObject>, BridgeError> {
    value.map(|present| coerce_object(name, present)).transpose()
}

fn coerce_object(name: &str, value: &Value) -> Result<JsonObject, BridgeError> {
    let parsed;
    let candidate = if let Value::String(text) = value {
        parsed = serde_json::from_str::<Value>(text).map_err(|error| {
            BridgeError::input(format!("{name} must be valid JSON if provided as a string."))
                .with_data(error_data([("error", Value::from(error.to_string()))]))
        })?;
        &parsed
    } else {
        value
    };
    match candidate {
        Value::Object(object) => Ok(object.clone()),
        other => Err(BridgeError::input(format!("{name} must be a JSON object."))
            .with_data(error_data([("type", Value::from(json_type_name(other)))]))),
    }
}

/// Reads a boolean option using JSON truthiness.
#[must_use]
pub fn flag(payload: &JsonObject, key: &str) -> bool {
    payload.get(key).is_some_and(is_truthy)
}

/// JSON truthiness: `false`, `null`, zero, and empty strings, arrays and
/// objects are false.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

/// Names the JSON type of `value` for diagnostics.
#[must_use]
pub const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
