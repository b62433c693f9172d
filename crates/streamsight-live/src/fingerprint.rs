//! View identity fingerprinting.
//!
//! A view's identity is (database, collection, filter, projection, sort).
//! Skip, limit, and ttl are read-time concerns applied over one shared
//! materialized set, so they never enter the fingerprint. Documents are
//! rendered through their wire shape into key-sorted JSON before hashing,
//! which makes the fingerprint independent of key insertion order.

use bson::Document;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use streamsight_commons::ejson;

/// Content hash identifying one live view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewFingerprint(String);

impl ViewFingerprint {
    pub fn compute(
        database: &str,
        collection: &str,
        filter: Option<&Document>,
        projection: Option<&Document>,
        sort: Option<&Document>,
    ) -> Self {
        let payload = serde_json::json!({
            "db": database,
            "collection": collection,
            "filter": wire_or_empty(filter),
            "projection": wire_or_empty(projection),
            "sort": wire_or_empty(sort),
        });

        let mut canonical = String::new();
        write_canonical(&payload, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn wire_or_empty(doc: Option<&Document>) -> Value {
    match doc {
        Some(doc) => ejson::document_to_wire(doc),
        None => Value::Object(serde_json::Map::new()),
    }
}

/// Render JSON with object keys sorted at every depth. Array order is
/// preserved (element order is meaningful in filters and sorts).
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl fmt::Display for ViewFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn identical_parameters_agree() {
        let a = ViewFingerprint::compute("db", "users", Some(&doc! { "age": 1 }), None, None);
        let b = ViewFingerprint::compute("db", "users", Some(&doc! { "age": 1 }), None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = ViewFingerprint::compute(
            "db",
            "users",
            Some(&doc! { "age": { "$gt": 18 }, "name": "John" }),
            Some(&doc! { "name": 1, "age": 1 }),
            None,
        );
        let b = ViewFingerprint::compute(
            "db",
            "users",
            Some(&doc! { "name": "John", "age": { "$gt": 18 } }),
            Some(&doc! { "age": 1, "name": 1 }),
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn missing_and_empty_documents_agree() {
        let a = ViewFingerprint::compute("db", "users", None, None, None);
        let b = ViewFingerprint::compute("db", "users", Some(&doc! {}), Some(&doc! {}), None);
        assert_eq!(a, b);
    }

    #[test]
    fn different_shapes_differ() {
        let base = ViewFingerprint::compute("db", "users", None, None, None);
        assert_ne!(
            base,
            ViewFingerprint::compute("db", "accounts", None, None, None)
        );
        assert_ne!(
            base,
            ViewFingerprint::compute("other", "users", None, None, None)
        );
        assert_ne!(
            base,
            ViewFingerprint::compute("db", "users", Some(&doc! { "x": 1 }), None, None)
        );
        assert_ne!(
            base,
            ViewFingerprint::compute("db", "users", None, None, Some(&doc! { "x": 1 }))
        );
    }
}
