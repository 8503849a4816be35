use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    response::Response,
};
use tracing::{error, info, warn};

use super::{AppState, error_response, timestamp};
use crate::core::backup::ManifestStatus;
use crate::core::service::ServiceError;

fn conflict() -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({ "detail": "Backup job is already running" })),
    )
        .into_response()
}

fn accepted(state: &AppState, message: String) -> Response {
    Json(serde_json::json!({
        "status": "accepted",
        "message": message,
        "timestamp": timestamp(state)
    }))
    .into_response()
}

/// Start the full job in the background. The running check here is advisory;
/// the run lock still decides if two triggers race.
pub async fn trigger_run(State(state): State<AppState>) -> Response {
    if state.service.is_running() {
        return conflict();
    }

    let service = state.service.clone();
    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        let summary = service.run_backup_job(&cancel).await;
        if summary.is_already_running() {
            warn!("Triggered backup skipped: a run is already in progress");
        } else {
            info!(
                "Triggered backup {} finished with status {}",
                summary.run_id,
                summary.status.as_str()
            );
        }
    });

    accepted(&state, "Backup job started in background".to_string())
}

pub async fn trigger_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    if !state.service.has_target(&project) {
        let err = match state.service.rejection(&project) {
            Some(reason) => ServiceError::InvalidTarget {
                identifier: project.clone(),
                reason: reason.to_string(),
            },
            None => ServiceError::UnknownTarget(project.clone()),
        };
        let status = match err {
            ServiceError::InvalidTarget { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::NOT_FOUND,
        };
        return error_response(status, err.to_string());
    }
    if state.service.is_running() {
        return conflict();
    }

    let service = state.service.clone();
    let cancel = state.cancel.clone();
    let id = project.clone();
    tokio::spawn(async move {
        match service.run_single_target(&id, &cancel).await {
            Ok(report) if report.status == ManifestStatus::Success => {
                info!(
                    "Project backup {} finished with status {}",
                    report.run_id,
                    report.status.as_str()
                );
            }
            Ok(report) => error!(
                "Project backup {} failed: {}",
                report.run_id,
                report.error.as_deref().unwrap_or("unknown error")
            ),
            Err(e) => error!("Project backup {} not started: {}", id, e),
        }
    });

    accepted(&state, format!("Backup started for project: {}", project))
}
