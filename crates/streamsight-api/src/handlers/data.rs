//! Mutation handlers for the built-in memory source.
//!
//! These write through `MemorySource`, whose change feed then drives the
//! live views, the same path an external store's feed would take.

use actix_web::{post, web, HttpResponse, Responder};
use std::sync::Arc;

use streamsight_commons::ejson;
use streamsight_source::MemorySource;

use crate::handlers::optional_document;
use crate::models::{
    DeleteRequest, DropRequest, ErrorResponse, InsertRequest, MutationResponse, UpdateRequest,
};

/// POST /insert: insert a batch of documents.
#[post("/insert")]
pub async fn insert(
    req: web::Json<InsertRequest>,
    source: web::Data<Arc<MemorySource>>,
) -> impl Responder {
    let req = req.into_inner();

    let mut documents = Vec::with_capacity(req.documents.len());
    for value in &req.documents {
        match ejson::document_from_wire(value) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                return HttpResponse::BadRequest()
                    .json(ErrorResponse::new("INVALID_DOCUMENT", e.to_string()))
            }
        }
    }

    match source.insert_many(&req.db, &req.collection, documents) {
        Ok(ids) => HttpResponse::Ok().json(MutationResponse::ok(ids.len() as u64)),
        Err(e) => {
            HttpResponse::BadRequest().json(ErrorResponse::new("INSERT_FAILED", e.to_string()))
        }
    }
}

/// POST /update: apply set/unset updates to matching documents.
#[post("/update")]
pub async fn update(
    req: web::Json<UpdateRequest>,
    source: web::Data<Arc<MemorySource>>,
) -> impl Responder {
    let req = req.into_inner();

    let filter = match ejson::document_from_wire(&req.filter) {
        Ok(doc) => doc,
        Err(e) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("INVALID_DOCUMENT", e.to_string()))
        }
    };
    let set = match optional_document("set", req.set.as_ref()) {
        Ok(doc) => doc.unwrap_or_default(),
        Err(e) => return HttpResponse::BadRequest().json(e),
    };
    let unset = req.unset.unwrap_or_default();

    let affected = source.update_many(&req.db, &req.collection, &filter, &set, &unset);
    HttpResponse::Ok().json(MutationResponse::ok(affected))
}

/// POST /delete: delete matching documents.
#[post("/delete")]
pub async fn delete(
    req: web::Json<DeleteRequest>,
    source: web::Data<Arc<MemorySource>>,
) -> impl Responder {
    let req = req.into_inner();

    let filter = match ejson::document_from_wire(&req.filter) {
        Ok(doc) => doc,
        Err(e) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("INVALID_DOCUMENT", e.to_string()))
        }
    };

    let affected = source.delete_many(&req.db, &req.collection, &filter);
    HttpResponse::Ok().json(MutationResponse::ok(affected))
}

/// POST /drop: drop a collection.
#[post("/drop")]
pub async fn drop_collection(
    req: web::Json<DropRequest>,
    source: web::Data<Arc<MemorySource>>,
) -> impl Responder {
    let req = req.into_inner();
    source.drop_collection(&req.db, &req.collection);
    HttpResponse::Ok().json(MutationResponse::ok(0))
}
