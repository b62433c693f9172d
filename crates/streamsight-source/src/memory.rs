//! In-memory document source.
//!
//! One `MemorySource` holds any number of (database, collection) document
//! sets. Every mutation emits the corresponding [`ChangeEvent`] to all
//! live subscribers of that collection, which makes it the reference
//! implementation of the adapter contract for the server binary and the
//! test suites.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use dashmap::DashMap;
use log::debug;
use tokio::sync::mpsc;

use streamsight_commons::paths::{delete_path, project_document, set_path};
use streamsight_commons::CollectionKey;
use streamsight_query::{compare_documents, matches, values_equal};

use crate::adapter::{ChangeFeed, SourceAdapter, SourceError};
use crate::events::ChangeEvent;

#[derive(Default)]
struct CollectionState {
    docs: Vec<Document>,
    subscribers: Vec<mpsc::UnboundedSender<ChangeEvent>>,
}

impl CollectionState {
    fn emit(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-process document store with live change feeds.
#[derive(Default)]
pub struct MemorySource {
    collections: DashMap<CollectionKey, CollectionState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one document. A missing `_id` gets a fresh ObjectId.
    /// Returns the id.
    pub fn insert_one(
        &self,
        database: &str,
        collection: &str,
        mut doc: Document,
    ) -> Result<Bson, SourceError> {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        let id = doc
            .get("_id")
            .cloned()
            .ok_or_else(|| SourceError::InvalidDocument("missing _id".into()))?;

        let key = CollectionKey::from_strings(database, collection);
        let mut state = self.collections.entry(key).or_default();
        state.docs.push(doc.clone());
        state.emit(ChangeEvent::Insert {
            id: id.clone(),
            full_document: doc,
        });
        Ok(id)
    }

    /// Insert a batch of documents, in order.
    pub fn insert_many(
        &self,
        database: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<Bson>, SourceError> {
        docs.into_iter()
            .map(|doc| self.insert_one(database, collection, doc))
            .collect()
    }

    /// Apply `$set`-shaped updates and `$unset`-shaped removals to every
    /// document matching the filter. Returns the number of updated
    /// documents.
    pub fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        set: &Document,
        unset: &[String],
    ) -> u64 {
        let key = CollectionKey::from_strings(database, collection);
        let mut updated = 0;
        let Some(mut state) = self.collections.get_mut(&key) else {
            return 0;
        };

        let mut events = Vec::new();
        for doc in state.docs.iter_mut() {
            if !matches(doc, filter) {
                continue;
            }
            for (path, value) in set {
                set_path(doc, path, value.clone());
            }
            for path in unset {
                delete_path(doc, path);
            }
            if let Some(id) = doc.get("_id").cloned() {
                events.push(ChangeEvent::Update {
                    id,
                    updated_fields: set.clone(),
                    removed_fields: unset.to_vec(),
                });
            }
            updated += 1;
        }
        for event in events {
            state.emit(event);
        }
        updated
    }

    /// Delete every document matching the filter. Returns the number
    /// removed.
    pub fn delete_many(&self, database: &str, collection: &str, filter: &Document) -> u64 {
        let key = CollectionKey::from_strings(database, collection);
        let Some(mut state) = self.collections.get_mut(&key) else {
            return 0;
        };

        let mut removed_ids = Vec::new();
        state.docs.retain(|doc| {
            if matches(doc, filter) {
                if let Some(id) = doc.get("_id").cloned() {
                    removed_ids.push(id);
                }
                false
            } else {
                true
            }
        });

        let removed = removed_ids.len() as u64;
        for id in removed_ids {
            state.emit(ChangeEvent::Delete { id });
        }
        removed
    }

    /// Drop the collection's documents; subscriptions stay alive and
    /// observe the drop.
    pub fn drop_collection(&self, database: &str, collection: &str) {
        let key = CollectionKey::from_strings(database, collection);
        if let Some(mut state) = self.collections.get_mut(&key) {
            state.docs.clear();
            state.emit(ChangeEvent::Drop);
        }
    }

    /// Invalidate the collection's change feed: subscribers receive
    /// `Invalidate` and their streams are closed. Used to exercise
    /// resubscription.
    pub fn invalidate(&self, database: &str, collection: &str) {
        let key = CollectionKey::from_strings(database, collection);
        if let Some(mut state) = self.collections.get_mut(&key) {
            state.emit(ChangeEvent::Invalidate);
            // Dropping the senders closes every subscriber's stream.
            state.subscribers.clear();
            debug!("invalidated feed for {}", key);
        }
    }

    /// Number of live subscriber channels for a collection.
    pub fn subscriber_count(&self, database: &str, collection: &str) -> usize {
        let key = CollectionKey::from_strings(database, collection);
        self.collections
            .get(&key)
            .map(|state| {
                state
                    .subscribers
                    .iter()
                    .filter(|tx| !tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    async fn query(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Document>,
        projection: Option<&Document>,
        sort: Option<&Document>,
    ) -> Result<Vec<Document>, SourceError> {
        let key = CollectionKey::from_strings(database, collection);
        let Some(state) = self.collections.get(&key) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<Document> = state
            .docs
            .iter()
            .filter(|doc| filter.map_or(true, |f| matches(doc, f)))
            .cloned()
            .collect();
        drop(state);

        if let Some(sort) = sort.filter(|s| !s.is_empty()) {
            results.sort_by(|a, b| compare_documents(a, b, sort));
        }

        Ok(results
            .iter()
            .map(|doc| project_document(doc, projection))
            .collect())
    }

    async fn subscribe(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<ChangeFeed, SourceError> {
        let key = CollectionKey::from_strings(database, collection);
        let (tx, rx) = mpsc::unbounded_channel();
        self.collections.entry(key).or_default().subscribers.push(tx);
        Ok(ChangeFeed::from_receiver(rx))
    }

    async fn fetch_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &Bson,
    ) -> Result<Option<Document>, SourceError> {
        let key = CollectionKey::from_strings(database, collection);
        let Some(state) = self.collections.get(&key) else {
            return Ok(None);
        };
        Ok(state
            .docs
            .iter()
            .find(|doc| doc.get("_id").is_some_and(|v| values_equal(v, id)))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn query_filters_sorts_and_projects() {
        let source = MemorySource::new();
        source
            .insert_many(
                "test",
                "users",
                vec![
                    doc! { "_id": 1, "name": "A", "age": 30 },
                    doc! { "_id": 2, "name": "B", "age": 10 },
                    doc! { "_id": 3, "name": "C", "age": 20 },
                    doc! { "_id": 4, "name": "D", "age": 5 },
                ],
            )
            .unwrap();

        let results = source
            .query(
                "test",
                "users",
                Some(&doc! { "age": { "$gt": 8 } }),
                Some(&doc! { "age": 1 }),
                Some(&doc! { "age": 1 }),
            )
            .await
            .unwrap();

        assert_eq!(
            results,
            vec![
                doc! { "_id": 2, "age": 10 },
                doc! { "_id": 3, "age": 20 },
                doc! { "_id": 1, "age": 30 },
            ]
        );
    }

    #[tokio::test]
    async fn subscription_observes_mutations() {
        let source = MemorySource::new();
        let mut feed = source.subscribe("test", "users").await.unwrap();

        source
            .insert_one("test", "users", doc! { "_id": 1, "age": 10 })
            .unwrap();
        source.update_many(
            "test",
            "users",
            &doc! { "_id": 1 },
            &doc! { "age": 11 },
            &[],
        );
        source.delete_many("test", "users", &doc! { "_id": 1 });
        source.drop_collection("test", "users");

        assert!(matches!(
            feed.next().await,
            Some(ChangeEvent::Insert { id: Bson::Int32(1), .. })
        ));
        match feed.next().await {
            Some(ChangeEvent::Update { updated_fields, removed_fields, .. }) => {
                assert_eq!(updated_fields, doc! { "age": 11 });
                assert!(removed_fields.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(feed.next().await, Some(ChangeEvent::Delete { .. })));
        assert!(matches!(feed.next().await, Some(ChangeEvent::Drop)));
    }

    #[tokio::test]
    async fn invalidate_closes_streams() {
        let source = MemorySource::new();
        let mut feed = source.subscribe("test", "users").await.unwrap();
        source.invalidate("test", "users");

        assert!(matches!(feed.next().await, Some(ChangeEvent::Invalidate)));
        assert!(feed.next().await.is_none());
        assert_eq!(source.subscriber_count("test", "users"), 0);

        // A fresh subscription works and observes new events.
        let mut feed = source.subscribe("test", "users").await.unwrap();
        source
            .insert_one("test", "users", doc! { "_id": 2 })
            .unwrap();
        assert!(matches!(feed.next().await, Some(ChangeEvent::Insert { .. })));
    }

    #[tokio::test]
    async fn fetch_by_id_compares_by_value() {
        let source = MemorySource::new();
        source
            .insert_one("test", "users", doc! { "_id": 5_i64, "name": "E" })
            .unwrap();

        let fetched = source
            .fetch_by_id("test", "users", &Bson::Int32(5))
            .await
            .unwrap();
        assert_eq!(fetched, Some(doc! { "_id": 5_i64, "name": "E" }));

        let missing = source
            .fetch_by_id("test", "users", &Bson::Int32(99))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn insert_generates_object_id_when_missing() {
        let source = MemorySource::new();
        let id = source
            .insert_one("test", "users", doc! { "name": "anon" })
            .unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));
    }

    #[tokio::test]
    async fn unset_paths_are_removed() {
        let source = MemorySource::new();
        source
            .insert_one("test", "users", doc! { "_id": 1, "a": 1, "b": 2 })
            .unwrap();
        let n = source.update_many(
            "test",
            "users",
            &doc! { "_id": 1 },
            &doc! {},
            &["b".to_string()],
        );
        assert_eq!(n, 1);
        let doc = source
            .fetch_by_id("test", "users", &Bson::Int32(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, doc! { "_id": 1, "a": 1 });
    }
}
