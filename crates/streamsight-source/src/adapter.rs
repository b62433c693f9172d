//! The source adapter trait.

use async_trait::async_trait;
use bson::{Bson, Document};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::ChangeEvent;

/// Errors surfaced by a source adapter.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

/// A live change-feed subscription for one collection.
///
/// The stream ends (returns `None`) when the source closes it; callers
/// obtain a fresh stream by calling [`SourceAdapter::subscribe`] again.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// The capabilities the live-view engine consumes from a document store.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// One-shot snapshot query: filtered, projected, sorted.
    async fn query(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Document>,
        projection: Option<&Document>,
        sort: Option<&Document>,
    ) -> Result<Vec<Document>, SourceError>;

    /// Open a change-feed subscription for one collection. Re-invoking
    /// after invalidation yields a fresh stream.
    async fn subscribe(&self, database: &str, collection: &str)
        -> Result<ChangeFeed, SourceError>;

    /// Fetch the current full document by id, if it still exists.
    async fn fetch_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &Bson,
    ) -> Result<Option<Document>, SourceError>;
}
