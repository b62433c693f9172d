//! Request and response models for the REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /v1/api/find request body.
///
/// `query`, `projection`, and `sort` are extended-JSON documents; `skip`,
/// `limit`, and `ttl` are read-time options that do not affect view
/// identity.
#[derive(Debug, Clone, Deserialize)]
pub struct FindRequest {
    pub db: String,
    pub collection: String,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub projection: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// POST /v1/api/insert request body.
#[derive(Debug, Clone, Deserialize)]
pub struct InsertRequest {
    pub db: String,
    pub collection: String,
    pub documents: Vec<Value>,
}

/// POST /v1/api/update request body: `$set`-shaped updates plus
/// `$unset`-shaped removals.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub db: String,
    pub collection: String,
    pub filter: Value,
    #[serde(default)]
    pub set: Option<Value>,
    #[serde(default)]
    pub unset: Option<Vec<String>>,
}

/// POST /v1/api/delete request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub db: String,
    pub collection: String,
    pub filter: Value,
}

/// POST /v1/api/drop request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DropRequest {
    pub db: String,
    pub collection: String,
}

/// Error payload shared by all endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Mutation acknowledgment.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    pub status: String,
    pub affected: u64,
}

impl MutationResponse {
    pub fn ok(affected: u64) -> Self {
        Self {
            status: "ok".to_string(),
            affected,
        }
    }
}

/// GET /v1/api/status response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub views: Vec<ViewStatus>,
    pub feeds: Vec<FeedStatus>,
}

/// Introspection for one live view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewStatus {
    pub fingerprint: String,
    pub db: String,
    pub collection: String,
    pub ready: bool,
    pub last_access_ms: i64,
    pub documents: usize,
}

/// Event rates for one multiplexed collection feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub db: String,
    pub collection: String,
    pub events_per_sec: usize,
    pub events_per_min: usize,
}
