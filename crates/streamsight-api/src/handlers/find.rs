//! Read-through handler for live view queries.

use actix_web::{post, web, HttpResponse, Responder};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

use streamsight_commons::ejson;
use streamsight_live::{ViewOptions, ViewRegistry};

use crate::handlers::optional_document;
use crate::models::{ErrorResponse, FindRequest};

/// POST /find: obtain (or reuse) the live view for the request's query
/// shape, wait for it to become Ready, and return a point-in-time slice.
///
/// The first request for a query shape pays the snapshot cost; repeated
/// requests are served from the continuously synchronized view. `skip`
/// and `limit` slice at read time and never create a new view.
#[post("/find")]
pub async fn find(
    req: web::Json<FindRequest>,
    registry: web::Data<Arc<ViewRegistry>>,
) -> impl Responder {
    let req = req.into_inner();

    let filter = match optional_document("query", req.query.as_ref()) {
        Ok(doc) => doc,
        Err(e) => return HttpResponse::BadRequest().json(e),
    };
    let projection = match optional_document("projection", req.projection.as_ref()) {
        Ok(doc) => doc,
        Err(e) => return HttpResponse::BadRequest().json(e),
    };
    let sort = match optional_document("sort", req.sort.as_ref()) {
        Ok(doc) => doc,
        Err(e) => return HttpResponse::BadRequest().json(e),
    };

    let view = registry.get_view(
        &req.db,
        &req.collection,
        ViewOptions {
            filter,
            projection,
            sort,
            skip: req.skip,
            limit: req.limit,
            ttl: req.ttl,
        },
    );

    if let Err(e) = view.wait_ready().await {
        return HttpResponse::InternalServerError()
            .json(ErrorResponse::new("VIEW_BOOTSTRAP_FAILED", e.to_string()));
    }

    let documents = view.get_data(req.skip, req.limit);
    debug!(
        "find {}.{}: {} documents",
        req.db,
        req.collection,
        documents.len()
    );

    let rows: Vec<Value> = documents.iter().map(ejson::document_to_wire).collect();
    HttpResponse::Ok().json(rows)
}
