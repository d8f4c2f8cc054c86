use axum::Json;
use serde_json::{json, Value};

/// 存活探针，不检查下游依赖
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "crawl-orchestrator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
