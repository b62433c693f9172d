//! Introspection handler.

use actix_web::{get, web, HttpResponse, Responder};
use std::sync::Arc;

use streamsight_live::ViewRegistry;

use crate::models::{FeedStatus, StatusResponse, ViewStatus};

/// GET /status: per-view readiness and size, per-feed event rates.
#[get("/status")]
pub async fn status(registry: web::Data<Arc<ViewRegistry>>) -> impl Responder {
    let views = registry
        .list()
        .into_iter()
        .map(|info| ViewStatus {
            fingerprint: info.fingerprint,
            db: info.database,
            collection: info.collection,
            ready: info.ready,
            last_access_ms: info.last_access_ms,
            documents: info.document_count,
        })
        .collect();

    let feeds = registry
        .multiplexer()
        .all_stats()
        .into_iter()
        .map(|(key, stats)| FeedStatus {
            db: key.database.to_string(),
            collection: key.collection.to_string(),
            events_per_sec: stats.events_per_sec,
            events_per_min: stats.events_per_min,
        })
        .collect();

    HttpResponse::Ok().json(StatusResponse { views, feeds })
}
