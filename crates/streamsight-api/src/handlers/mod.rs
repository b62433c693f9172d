//! HTTP request handlers.

pub mod data;
pub mod find;
pub mod status;

use bson::Document;
use serde_json::Value;

use streamsight_commons::ejson;

use crate::models::ErrorResponse;

/// Decode an optional extended-JSON document field of a request body.
pub(crate) fn optional_document(
    field: &str,
    value: Option<&Value>,
) -> Result<Option<Document>, ErrorResponse> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => ejson::document_from_wire(value)
            .map(Some)
            .map_err(|e| ErrorResponse::new("INVALID_DOCUMENT", format!("{}: {}", field, e))),
    }
}
