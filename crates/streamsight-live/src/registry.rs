//! View registry: fingerprint-deduplicated live view lifecycle.

use dashmap::DashMap;
use log::info;
use std::sync::Arc;

use streamsight_commons::CollectionKey;
use streamsight_source::SourceAdapter;

use crate::fingerprint::ViewFingerprint;
use crate::multiplexer::ChangeFeedMultiplexer;
use crate::view::{LiveView, ViewOptions};

/// Introspection snapshot for one managed view.
#[derive(Debug, Clone)]
pub struct ViewInfo {
    pub fingerprint: String,
    pub database: String,
    pub collection: String,
    pub ready: bool,
    pub last_access_ms: i64,
    pub document_count: usize,
}

/// Owns every live view, deduplicated by query-shape fingerprint.
///
/// Views are created lazily on first request and live until
/// [`ViewRegistry::stop_all`]; there is no automatic eviction.
pub struct ViewRegistry {
    source: Arc<dyn SourceAdapter>,
    multiplexer: Arc<ChangeFeedMultiplexer>,
    views: DashMap<ViewFingerprint, Arc<LiveView>>,
}

impl ViewRegistry {
    pub fn new(source: Arc<dyn SourceAdapter>) -> Self {
        let multiplexer = Arc::new(ChangeFeedMultiplexer::new(Arc::clone(&source)));
        Self {
            source,
            multiplexer,
            views: DashMap::new(),
        }
    }

    /// Return the existing view for this query shape, or construct
    /// exactly one. Concurrent requests for an identical fingerprint are
    /// single-flighted through the map's entry lock.
    pub fn get_view(&self, database: &str, collection: &str, options: ViewOptions) -> Arc<LiveView> {
        let fingerprint = ViewFingerprint::compute(
            database,
            collection,
            options.filter.as_ref(),
            options.projection.as_ref(),
            options.sort.as_ref(),
        );

        // A view whose bootstrap failed is discarded here so that the
        // caller's retry constructs a fresh one.
        self.views.remove_if(&fingerprint, |_, view| view.is_failed());

        self.views
            .entry(fingerprint)
            .or_insert_with(|| {
                info!("creating live view for {}.{}", database, collection);
                LiveView::spawn(
                    Arc::clone(&self.source),
                    Arc::clone(&self.multiplexer),
                    CollectionKey::from_strings(database, collection),
                    options,
                )
            })
            .clone()
    }

    /// Stop every managed view. Used at process shutdown.
    pub fn stop_all(&self) {
        info!("stopping {} live views", self.views.len());
        for entry in self.views.iter() {
            entry.value().stop();
        }
        self.views.clear();
    }

    /// Introspection over all managed views.
    pub fn list(&self) -> Vec<ViewInfo> {
        self.views
            .iter()
            .map(|entry| {
                let view = entry.value();
                ViewInfo {
                    fingerprint: entry.key().to_string(),
                    database: view.key().database.to_string(),
                    collection: view.key().collection.to_string(),
                    ready: view.is_ready(),
                    last_access_ms: view.last_access_ms(),
                    document_count: view.len(),
                }
            })
            .collect()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn multiplexer(&self) -> &Arc<ChangeFeedMultiplexer> {
        &self.multiplexer
    }
}
