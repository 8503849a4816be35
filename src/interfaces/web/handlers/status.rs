use axum::{Json, extract::State, response::IntoResponse, response::Response};
use tracing::warn;

use super::AppState;

pub async fn get_status(State(state): State<AppState>) -> Response {
    let last_run = state.service.state().read_last_run().unwrap_or_else(|e| {
        warn!("Failed to read last run: {}", e);
        None
    });

    let mut body = serde_json::json!({
        "databases_configured": state.service.targets().len(),
        "database_names": state.service.database_names(),
        "currently_running": state.service.is_running(),
        "scheduler_cron": state.scheduler_cron,
        "timezone": state.timezone,
        "last_run": last_run,
    });
    if last_run.is_none() {
        body["status"] = "no_runs_yet".into();
        body["message"] = "No backup runs have been executed yet".into();
    }

    Json(body).into_response()
}
