//! Live view: one materialized, continuously synchronized result set.
//!
//! A view is built once from a snapshot query and then kept current by
//! applying the collection's change feed. Events that arrive while the
//! snapshot is loading queue up in the view's event channel and replay,
//! in arrival order, before the view flips to Ready. No event is applied
//! against a half-built state.
//!
//! All mutation runs on the view's single apply task, so each multi-step
//! read-modify-write over the ordered sequence and the id index is
//! naturally serialized. Reads copy out under the state lock and never
//! alias live state.

use bson::{Bson, Document};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use streamsight_commons::paths::{delete_path, path_included, project_document, set_path};
use streamsight_commons::{CollectionKey, DocId};
use streamsight_query::{compare_documents, matches};
use streamsight_source::{ChangeEvent, SourceAdapter};

use crate::error::{LiveError, Result};
use crate::multiplexer::ChangeFeedMultiplexer;

/// Query shape and read defaults for one view.
///
/// `skip`, `limit`, and `ttl` are not part of view identity: they apply
/// at read time over the shared materialized set (`ttl` is parsed and
/// reserved; no eviction policy is implemented).
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub filter: Option<Document>,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub ttl: Option<u64>,
}

/// Readiness of a view, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Bootstrapping,
    Ready,
    Failed(String),
}

/// The materialized result set: one owned record per document, reachable
/// through two access paths (the sort-ordered id sequence and the id
/// index). When the view is Ready the two key sets are identical.
#[derive(Default)]
pub(crate) struct ViewState {
    pub(crate) ordered: Vec<DocId>,
    pub(crate) docs: HashMap<DocId, Document>,
}

impl ViewState {
    fn clear(&mut self) {
        self.ordered.clear();
        self.docs.clear();
    }
}

/// Sorted insertion point for a document: before the first strictly
/// greater element. Equal-key runs keep arrival order (new ties append
/// after existing ones).
pub(crate) fn insert_position(state: &ViewState, doc: &Document, sort: &Document) -> usize {
    state
        .ordered
        .iter()
        .position(|id| {
            state
                .docs
                .get(id)
                .is_some_and(|existing| compare_documents(doc, existing, sort).is_lt())
        })
        .unwrap_or(state.ordered.len())
}

/// Insert an owned record into both access paths.
pub(crate) fn insert_into_state(
    state: &mut ViewState,
    id: DocId,
    doc: Document,
    sort: Option<&Document>,
) {
    match sort.filter(|s| !s.is_empty()) {
        Some(sort) => {
            let at = insert_position(state, &doc, sort);
            state.ordered.insert(at, id.clone());
        }
        None => state.ordered.push(id.clone()),
    }
    state.docs.insert(id, doc);
}

/// Remove a record from both access paths. Returns whether it was present.
pub(crate) fn remove_from_state(state: &mut ViewState, id: &DocId) -> bool {
    if state.docs.remove(id).is_none() {
        return false;
    }
    if let Some(pos) = state.ordered.iter().position(|x| x == id) {
        state.ordered.remove(pos);
    }
    true
}

/// Re-seat an already-updated record at its new sort position.
fn reposition_in_state(state: &mut ViewState, id: &DocId, sort: &Document) {
    if let Some(pos) = state.ordered.iter().position(|x| x == id) {
        state.ordered.remove(pos);
    }
    let at = match state.docs.get(id) {
        Some(doc) => insert_position(state, doc, sort),
        None => return,
    };
    state.ordered.insert(at, id.clone());
}

/// Mutate a stored record per an update description: set each updated
/// path (creating intermediate documents), delete each removed path.
/// Paths outside an active projection are skipped so stored records stay
/// projected.
pub(crate) fn apply_update_description(
    doc: &mut Document,
    updated_fields: &Document,
    removed_fields: &[String],
    projection: Option<&Document>,
) {
    for (path, value) in updated_fields {
        if path_included(projection, path) {
            set_path(doc, path, value.clone());
        }
    }
    for path in removed_fields {
        delete_path(doc, path);
    }
}

/// Whether an update description touches any sort-key field.
pub(crate) fn sort_field_changed(
    sort: &Document,
    updated_fields: &Document,
    removed_fields: &[String],
) -> bool {
    sort.keys()
        .any(|key| updated_fields.contains_key(key) || removed_fields.iter().any(|r| r == key))
}

/// One live, continuously synchronized view.
pub struct LiveView {
    key: CollectionKey,
    options: ViewOptions,
    state: RwLock<ViewState>,
    ready_tx: watch::Sender<ReadyState>,
    ready_rx: watch::Receiver<ReadyState>,
    last_access_ms: AtomicI64,
    stopped: AtomicBool,
    cancel: CancellationToken,
    handler_id: u64,
    source: Arc<dyn SourceAdapter>,
    multiplexer: Arc<ChangeFeedMultiplexer>,
}

impl LiveView {
    /// Register with the multiplexer and start the bootstrap/apply task.
    ///
    /// Registration happens before the snapshot query is issued, so every
    /// event from that point on is either buffered (pre-Ready) or applied
    /// (post-Ready); none is lost in between.
    pub fn spawn(
        source: Arc<dyn SourceAdapter>,
        multiplexer: Arc<ChangeFeedMultiplexer>,
        key: CollectionKey,
        options: ViewOptions,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handler_id = multiplexer.register(&key, event_tx);
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Bootstrapping);

        let view = Arc::new(Self {
            key,
            options,
            state: RwLock::new(ViewState::default()),
            ready_tx,
            ready_rx,
            last_access_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handler_id,
            source,
            multiplexer,
        });

        tokio::spawn(Arc::clone(&view).run(event_rx));
        view
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        let snapshot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = self
                    .ready_tx
                    .send(ReadyState::Failed("view stopped during bootstrap".to_string()));
                return;
            }
            result = self.source.query(
                self.key.database.as_str(),
                self.key.collection.as_str(),
                self.options.filter.as_ref(),
                self.options.projection.as_ref(),
                self.options.sort.as_ref(),
            ) => result,
        };

        let documents = match snapshot {
            Ok(documents) => documents,
            Err(e) => {
                warn!("snapshot query failed for {}: {}", self.key, e);
                let _ = self.ready_tx.send(ReadyState::Failed(e.to_string()));
                self.multiplexer.unregister(&self.key, self.handler_id);
                return;
            }
        };

        {
            // Snapshot results arrive already sorted and projected.
            let mut state = self.state.write();
            for doc in documents {
                if let Some(id) = DocId::from_document(&doc) {
                    state.ordered.push(id.clone());
                    state.docs.insert(id, doc);
                }
            }
        }

        // Replay events buffered during the snapshot, in arrival order,
        // through the same apply logic used once Ready.
        let mut replayed = 0_usize;
        while let Ok(event) = events.try_recv() {
            self.apply_event(event).await;
            replayed += 1;
        }
        if replayed > 0 {
            debug!("replayed {} buffered events for {}", replayed, self.key);
        }

        let _ = self.ready_tx.send(ReadyState::Ready);
        debug!("view ready: {} ({} documents)", self.key, self.len());

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.apply_event(event).await,
                    None => break,
                },
            }
        }
    }

    async fn apply_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Insert { id, full_document } => self.apply_insert(&id, full_document),
            ChangeEvent::Update {
                id,
                updated_fields,
                removed_fields,
            } => self.apply_update(id, updated_fields, removed_fields).await,
            ChangeEvent::Delete { id } => self.apply_delete(&id),
            ChangeEvent::Drop => self.state.write().clear(),
            // The multiplexer handles invalidation internally; nothing to do.
            ChangeEvent::Invalidate => debug!("ignoring invalidate event in view {}", self.key),
        }
    }

    fn apply_insert(&self, id: &Bson, full_document: Document) {
        let belongs = self
            .options
            .filter
            .as_ref()
            .map_or(true, |f| matches(&full_document, f));
        if !belongs {
            return;
        }

        let doc_id = DocId::from_bson(id);
        let projected = project_document(&full_document, self.options.projection.as_ref());

        let mut state = self.state.write();
        // An insert for an id already indexed is an idempotent upsert.
        remove_from_state(&mut state, &doc_id);
        insert_into_state(&mut state, doc_id, projected, self.options.sort.as_ref());
    }

    async fn apply_update(&self, id: Bson, updated_fields: Document, removed_fields: Vec<String>) {
        let doc_id = DocId::from_bson(&id);
        let sort = self.options.sort.as_ref().filter(|s| !s.is_empty());

        let handled = {
            let mut state = self.state.write();
            let mut evict = false;
            let mut reseat = false;
            let mut present = false;

            if let Some(doc) = state.docs.get_mut(&doc_id) {
                present = true;
                apply_update_description(
                    doc,
                    &updated_fields,
                    &removed_fields,
                    self.options.projection.as_ref(),
                );
                let still_matches = self.options.filter.as_ref().map_or(true, |f| matches(doc, f));
                if !still_matches {
                    evict = true;
                } else if let Some(sort) = sort {
                    // A full reposition preserves the comparator's total
                    // order; in-place value changes elsewhere are already
                    // visible.
                    reseat = sort_field_changed(sort, &updated_fields, &removed_fields);
                }
            }

            if evict {
                remove_from_state(&mut state, &doc_id);
            } else if reseat {
                if let Some(sort) = sort {
                    reposition_in_state(&mut state, &doc_id, sort);
                }
            }
            present
        };

        if handled {
            return;
        }

        // The document is not indexed and the event carries no body:
        // fetch the current document and re-classify it from scratch.
        match self
            .source
            .fetch_by_id(self.key.database.as_str(), self.key.collection.as_str(), &id)
            .await
        {
            Ok(Some(doc)) => self.apply_insert(&id, doc),
            Ok(None) => {} // already deleted upstream
            Err(e) => warn!(
                "fetch-by-id failed for {} in {}; dropping update: {}",
                DocId::from_bson(&id),
                self.key,
                e
            ),
        }
    }

    fn apply_delete(&self, id: &Bson) {
        let doc_id = DocId::from_bson(id);
        let mut state = self.state.write();
        remove_from_state(&mut state, &doc_id);
    }

    /// Point-in-time slice of the materialized data. Documents are cloned
    /// out; concurrent applies cannot mutate what the caller holds.
    pub fn get_data(&self, skip: Option<usize>, limit: Option<usize>) -> Vec<Document> {
        self.last_access_ms
            .store(chrono::Utc::now().timestamp_millis(), AtomicOrdering::Relaxed);

        let state = self.state.read();
        state
            .ordered
            .iter()
            .skip(skip.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|id| state.docs.get(id).cloned())
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow() == ReadyState::Ready
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.ready_rx.borrow(), ReadyState::Failed(_))
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_rx.borrow().clone()
    }

    /// Block until the Bootstrapping → Ready transition. A failed
    /// snapshot surfaces here; the caller may retry by re-requesting the
    /// view.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.ready_rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(reason) => return Err(LiveError::BootstrapFailed(reason)),
                ReadyState::Bootstrapping => {
                    if rx.changed().await.is_err() {
                        return Err(LiveError::Stopped);
                    }
                }
            }
        }
    }

    /// Unregister from the multiplexer and wind down the apply task.
    ///
    /// An apply already in flight finishes first (finish-then-stop);
    /// unregistration is immediate, so no further events are delivered.
    /// Safe to call repeatedly and concurrently with applies.
    pub fn stop(&self) {
        if self.stopped.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        self.multiplexer.unregister(&self.key, self.handler_id);
        self.cancel.cancel();
        debug!("view stopped: {}", self.key);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.state.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Milliseconds-since-epoch timestamp of the last `get_data` call.
    pub fn last_access_ms(&self) -> i64 {
        self.last_access_ms.load(AtomicOrdering::Relaxed)
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn state_with(docs: Vec<Document>, sort: Option<&Document>) -> ViewState {
        let mut state = ViewState::default();
        for doc in docs {
            let id = DocId::from_document(&doc).unwrap();
            insert_into_state(&mut state, id, doc, sort);
        }
        state
    }

    fn ages(state: &ViewState) -> Vec<i32> {
        state
            .ordered
            .iter()
            .map(|id| state.docs[id].get_i32("age").unwrap())
            .collect()
    }

    #[test]
    fn sorted_insert_orders_ascending() {
        let sort = doc! { "age": 1 };
        let state = state_with(
            vec![
                doc! { "_id": 1, "age": 30 },
                doc! { "_id": 2, "age": 10 },
                doc! { "_id": 3, "age": 20 },
            ],
            Some(&sort),
        );
        assert_eq!(ages(&state), vec![10, 20, 30]);
    }

    #[test]
    fn sorted_insert_orders_descending() {
        let sort = doc! { "age": -1 };
        let state = state_with(
            vec![
                doc! { "_id": 1, "age": 30 },
                doc! { "_id": 2, "age": 10 },
                doc! { "_id": 3, "age": 20 },
            ],
            Some(&sort),
        );
        assert_eq!(ages(&state), vec![30, 20, 10]);
    }

    #[test]
    fn unsorted_insert_appends() {
        let state = state_with(
            vec![
                doc! { "_id": 1, "age": 30 },
                doc! { "_id": 2, "age": 10 },
            ],
            None,
        );
        assert_eq!(ages(&state), vec![30, 10]);
    }

    #[test]
    fn equal_sort_keys_keep_arrival_order() {
        let sort = doc! { "age": 1 };
        let state = state_with(
            vec![
                doc! { "_id": 1, "age": 20, "tag": "first" },
                doc! { "_id": 2, "age": 20, "tag": "second" },
                doc! { "_id": 3, "age": 10 },
            ],
            Some(&sort),
        );
        let tags: Vec<_> = state
            .ordered
            .iter()
            .filter_map(|id| state.docs[id].get_str("tag").ok().map(str::to_string))
            .collect();
        assert_eq!(tags, vec!["first", "second"]);
        assert_eq!(ages(&state), vec![10, 20, 20]);
    }

    #[test]
    fn multi_key_ties_break_on_later_fields() {
        let sort = doc! { "age": 1, "name": 1 };
        let state = state_with(
            vec![
                doc! { "_id": 1, "age": 20, "name": "zoe" },
                doc! { "_id": 2, "age": 20, "name": "amy" },
            ],
            Some(&sort),
        );
        let names: Vec<_> = state
            .ordered
            .iter()
            .map(|id| state.docs[id].get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["amy", "zoe"]);
    }

    #[test]
    fn remove_keeps_structures_aligned() {
        let mut state = state_with(
            vec![doc! { "_id": 1, "age": 1 }, doc! { "_id": 2, "age": 2 }],
            None,
        );
        let id = DocId::from_bson(&Bson::Int32(1));
        assert!(remove_from_state(&mut state, &id));
        assert_eq!(state.ordered.len(), 1);
        assert_eq!(state.docs.len(), 1);
        assert!(!remove_from_state(&mut state, &id));
    }

    #[test]
    fn update_description_sets_and_removes() {
        let mut doc = doc! { "_id": 1, "name": "John", "age": 10, "tmp": true };
        apply_update_description(
            &mut doc,
            &doc! { "age": 21, "address.city": "Oslo" },
            &["tmp".to_string()],
            None,
        );
        assert_eq!(
            doc,
            doc! { "_id": 1, "name": "John", "age": 21, "address": { "city": "Oslo" } }
        );
    }

    #[test]
    fn update_description_respects_projection() {
        let projection = doc! { "name": 1, "age": 1 };
        let mut doc = doc! { "_id": 1, "name": "John", "age": 10 };
        apply_update_description(
            &mut doc,
            &doc! { "age": 11, "email": "j@x" },
            &[],
            Some(&projection),
        );
        assert_eq!(doc, doc! { "_id": 1, "name": "John", "age": 11 });
    }

    #[test]
    fn sort_field_change_detection() {
        let sort = doc! { "age": 1 };
        assert!(sort_field_changed(&sort, &doc! { "age": 5 }, &[]));
        assert!(sort_field_changed(&sort, &doc! {}, &["age".to_string()]));
        assert!(!sort_field_changed(&sort, &doc! { "name": "x" }, &["email".to_string()]));
    }
}
