use axum::Json;
use serde_json::{json, Value};

/// Unconditional liveness probe — never touches config, sessions, or
/// providers, so it stays truthful even while those are degraded.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
