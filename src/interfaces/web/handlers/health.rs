use axum::{Json, extract::State};

use super::{AppState, timestamp};

pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "PostgreSQL Backup Service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/healthz",
            "readiness": "/readyz",
            "status": "/status",
            "trigger_all": "/run (POST)",
            "trigger_project": "/run/{project} (POST)"
        }
    }))
}

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": timestamp(&state)
    }))
}

pub async fn readyz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ready",
        "running": state.service.is_running(),
        "timestamp": timestamp(&state)
    }))
}
