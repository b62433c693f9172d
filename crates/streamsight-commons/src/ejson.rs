//! Extended-JSON wire conversion.
//!
//! Transport payloads are plain JSON; ObjectId and DateTime values travel
//! wrapped as `{"$oid": "<hex>"}` and `{"$date": {"$numberLong": "<ms>"}}`.
//! Binary and regular-expression scalars use the canonical
//! `{"$binary": ...}` / `{"$regularExpression": ...}` shapes. Everything
//! else passes through as plain JSON, recursively.
//!
//! Note that operator keys inside filters (`$regex`, `$gt`, ...) are NOT
//! wire wrappers: only the exact wrapper shapes below are converted, so
//! filter documents round-trip untouched.

use base64::Engine;
use bson::{oid::ObjectId, Bson, Document};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding a wire payload into Bson.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid binary payload: {0}")]
    InvalidBinary(String),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Unrepresentable number: {0}")]
    BadNumber(String),
}

/// Convert a wire JSON value into Bson, unwrapping extended-JSON scalars.
pub fn from_wire(value: &Value) -> Result<Bson, WireError> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Ok(Bson::Int32(i as i32))
                } else {
                    Ok(Bson::Int64(i))
                }
            } else if let Some(f) = n.as_f64() {
                Ok(Bson::Double(f))
            } else {
                Err(WireError::BadNumber(n.to_string()))
            }
        }
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Array(items) => {
            let converted = items.iter().map(from_wire).collect::<Result<Vec<_>, _>>()?;
            Ok(Bson::Array(converted))
        }
        Value::Object(map) => from_wire_object(map),
    }
}

fn from_wire_object(map: &Map<String, Value>) -> Result<Bson, WireError> {
    if map.len() == 1 {
        if let Some(Value::String(hex)) = map.get("$oid") {
            let oid = ObjectId::parse_str(hex)
                .map_err(|e| WireError::InvalidObjectId(format!("{}: {}", hex, e)))?;
            return Ok(Bson::ObjectId(oid));
        }

        if let Some(Value::Object(inner)) = map.get("$date") {
            if let Some(millis) = inner.get("$numberLong") {
                let millis = match millis {
                    Value::String(s) => s
                        .parse::<i64>()
                        .map_err(|_| WireError::InvalidDate(s.clone()))?,
                    Value::Number(n) => n
                        .as_i64()
                        .ok_or_else(|| WireError::InvalidDate(n.to_string()))?,
                    other => return Err(WireError::InvalidDate(other.to_string())),
                };
                return Ok(Bson::DateTime(bson::DateTime::from_millis(millis)));
            }
        }

        if let Some(Value::Object(inner)) = map.get("$binary") {
            if let Some(Value::String(b64)) = inner.get("base64") {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| WireError::InvalidBinary(e.to_string()))?;
                let subtype = inner
                    .get("subType")
                    .and_then(Value::as_str)
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .unwrap_or(0);
                return Ok(Bson::Binary(bson::Binary {
                    subtype: subtype.into(),
                    bytes,
                }));
            }
        }

        if let Some(Value::Object(inner)) = map.get("$regularExpression") {
            let pattern = inner
                .get("pattern")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let options = inner
                .get("options")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Bson::RegularExpression(bson::Regex { pattern, options }));
        }
    }

    let mut doc = Document::new();
    for (key, val) in map {
        doc.insert(key.clone(), from_wire(val)?);
    }
    Ok(Bson::Document(doc))
}

/// Convert a wire JSON object into a Bson document.
pub fn document_from_wire(value: &Value) -> Result<Document, WireError> {
    match from_wire(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(WireError::NotAnObject(format!("{:?}", other))),
    }
}

/// Convert a Bson value into its wire JSON shape.
pub fn to_wire(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Int64(i) => Value::Number((*i).into()),
        Bson::Double(d) => serde_json::Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(to_wire).collect()),
        Bson::Document(doc) => document_to_wire(doc),
        Bson::ObjectId(oid) => serde_json::json!({ "$oid": oid.to_hex() }),
        Bson::DateTime(dt) => serde_json::json!({
            "$date": { "$numberLong": dt.timestamp_millis().to_string() }
        }),
        Bson::Binary(bin) => serde_json::json!({
            "$binary": {
                "base64": base64::engine::general_purpose::STANDARD.encode(&bin.bytes),
                "subType": format!("{:02x}", u8::from(bin.subtype)),
            }
        }),
        Bson::RegularExpression(re) => serde_json::json!({
            "$regularExpression": { "pattern": re.pattern, "options": re.options }
        }),
        // Remaining scalar kinds have no wire mapping; render through
        // relaxed extended JSON rather than dropping them.
        other => other.clone().into_relaxed_extjson(),
    }
}

/// Convert a Bson document into its wire JSON shape.
pub fn document_to_wire(doc: &Document) -> Value {
    let mut map = Map::new();
    for (key, val) in doc {
        map.insert(key.clone(), to_wire(val));
    }
    Value::Object(map)
}
