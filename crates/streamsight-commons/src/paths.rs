//! Dot-path access into documents.
//!
//! Field paths are dot-separated and may index into arrays
//! (`"items.0.price"`). Empty segments are skipped, so `"a..b"` and
//! `"a.b"` resolve identically.

use bson::{Bson, Document};

/// Resolve a dot-path against a document.
///
/// Returns `None` when any intermediate segment is missing or not
/// traversable (scalar in the middle of the path, non-numeric segment
/// against an array).
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current: Option<&Bson> = None;

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            None => doc.get(segment),
            Some(Bson::Document(sub)) => sub.get(segment),
            Some(Bson::Array(arr)) => segment.parse::<usize>().ok().and_then(|i| arr.get(i)),
            Some(_) => None,
        };
        current?;
    }

    current
}

/// Set a value at a dot-path, creating intermediate documents as needed.
///
/// A non-document value in the middle of the path is replaced by an empty
/// document, matching the upstream change-feed's `$set` semantics.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, intermediate)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in intermediate {
        if !matches!(current.get(*segment), Some(Bson::Document(_))) {
            current.insert(segment.to_string(), Bson::Document(Document::new()));
        }
        current = match current.get_mut(*segment) {
            Some(Bson::Document(sub)) => sub,
            _ => return,
        };
    }

    current.insert(last.to_string(), value);
}

/// Remove the value at a dot-path. Missing intermediate segments make this
/// a no-op.
pub fn delete_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return;
    }

    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        current = match current.get_mut(*segment) {
            Some(Bson::Document(sub)) => sub,
            _ => return,
        };
    }

    current.remove(segments[segments.len() - 1]);
}

/// Apply an inclusion projection to a document.
///
/// Each projection key is a dot-path whose value is a truthy inclusion
/// flag. The `_id` field is always carried over. With no projection the
/// document is returned unchanged.
pub fn project_document(doc: &Document, projection: Option<&Document>) -> Document {
    let projection = match projection {
        Some(p) if !p.is_empty() => p,
        _ => return doc.clone(),
    };

    let mut out = Document::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }

    for (path, flag) in projection {
        if !inclusion_flag(flag) {
            continue;
        }
        if let Some(value) = get_path(doc, path) {
            set_path(&mut out, path, value.clone());
        }
    }

    out
}

/// Whether a dot-path survives an inclusion projection.
///
/// A path is included when it equals an included path, is nested under
/// one, or is an ancestor of one. `_id` is always included.
pub fn path_included(projection: Option<&Document>, path: &str) -> bool {
    let projection = match projection {
        Some(p) if !p.is_empty() => p,
        _ => return true,
    };

    if path == "_id" {
        return true;
    }

    projection.iter().any(|(included, flag)| {
        inclusion_flag(flag)
            && (included == path
                || path.starts_with(&format!("{}.", included))
                || included.starts_with(&format!("{}.", path)))
    })
}

fn inclusion_flag(flag: &Bson) -> bool {
    match flag {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(d) => *d != 0.0,
        _ => false,
    }
}
