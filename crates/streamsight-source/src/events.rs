//! Change-feed event taxonomy.

use bson::{Bson, Document};

/// One mutation notification from a collection's change feed.
///
/// Only `Insert` carries a document body; `Update` carries the touched
/// paths, everything else just the id (or nothing).
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert {
        id: Bson,
        full_document: Document,
    },
    Update {
        id: Bson,
        /// Dot-path → new value.
        updated_fields: Document,
        /// Dot-paths removed from the document.
        removed_fields: Vec<String>,
    },
    Delete {
        id: Bson,
    },
    /// The whole collection was dropped.
    Drop,
    /// The feed itself became invalid; subscribers must resubscribe.
    Invalidate,
}

impl ChangeEvent {
    /// The id of the affected document, when the event names one.
    pub fn document_id(&self) -> Option<&Bson> {
        match self {
            ChangeEvent::Insert { id, .. }
            | ChangeEvent::Update { id, .. }
            | ChangeEvent::Delete { id } => Some(id),
            ChangeEvent::Drop | ChangeEvent::Invalidate => None,
        }
    }
}
