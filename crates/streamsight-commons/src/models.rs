//! Type-safe identifier wrappers.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database name wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseName(pub String);

impl DatabaseName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DatabaseName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collection name wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionName(pub String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CollectionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key identifying one watched collection: (database, collection).
///
/// Used as the map key for change-feed sharing: exactly one underlying
/// subscription exists per `CollectionKey` regardless of how many live
/// views watch it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    pub database: DatabaseName,
    pub collection: CollectionName,
}

impl CollectionKey {
    pub fn new(database: impl Into<DatabaseName>, collection: impl Into<CollectionName>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn from_strings(database: &str, collection: &str) -> Self {
        Self {
            database: DatabaseName::from(database),
            collection: CollectionName::from(collection),
        }
    }
}

impl From<String> for DatabaseName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for CollectionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Index key for a document: the canonical string rendering of its `_id`
/// value.
///
/// `_id` may be any scalar Bson value (ObjectId, string, number). The
/// rendering is tagged by type so that e.g. the string `"1"` and the
/// integer `1` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocId(String);

impl DocId {
    /// Derive the index key from a raw `_id` value.
    pub fn from_bson(id: &Bson) -> Self {
        let rendered = match id {
            Bson::ObjectId(oid) => format!("oid:{}", oid.to_hex()),
            Bson::String(s) => format!("str:{}", s),
            Bson::Int32(i) => format!("int:{}", i),
            Bson::Int64(i) => format!("int:{}", i),
            // Integral doubles collapse onto the integer rendering so that
            // cross-width ids refer to the same record.
            Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => format!("int:{}", *d as i64),
            Bson::Double(d) => format!("dbl:{}", d),
            Bson::Boolean(b) => format!("bool:{}", b),
            Bson::DateTime(dt) => format!("date:{}", dt.timestamp_millis()),
            other => format!("bson:{:?}", other),
        };
        Self(rendered)
    }

    /// Derive the index key from a document's `_id` field, if present.
    pub fn from_document(doc: &bson::Document) -> Option<Self> {
        doc.get("_id").map(Self::from_bson)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
