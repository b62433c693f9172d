//! # streamsight-api
//!
//! The HTTP surface over the live-view engine:
//! - `POST /v1/api/find`: read-through to a live view (creates it on
//!   first request, then serves the materialized data)
//! - `POST /v1/api/insert` / `update` / `delete` / `drop`: mutations
//!   against the built-in memory source
//! - `GET /v1/api/status`: per-view and per-feed introspection
//!
//! Values cross the wire as extended JSON (see
//! `streamsight_commons::ejson`); request/response schema validation
//! lives here, never in the engine.

pub mod handlers;
pub mod models;

use actix_web::web;

/// Register every API route. Mount under the version scope:
/// `web::scope("/v1/api").configure(streamsight_api::configure)`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::find::find)
        .service(handlers::status::status)
        .service(handlers::data::insert)
        .service(handlers::data::update)
        .service(handlers::data::delete)
        .service(handlers::data::drop_collection);
}
