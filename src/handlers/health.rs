//! Liveness endpoint.

use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// `GET /health`
pub async fn check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "mailflow",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
