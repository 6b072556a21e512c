use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

use super::{
    error::ApiError,
    models::{
        ActionResponse, ActiveDownload, ConfigResponse, DeleteRequest, DownloadsResponse,
        HandlersResponse, HealthResponse, StatsResponse, SubmitRequest, SubmitResponse,
    },
    state::AppState,
};
use crate::humanize;
use crate::jobs::ControlOutcome;

/// Merged download view (GET /api/downloads)
///
/// Active jobs across every backend plus the completed history, as of the
/// last reconciliation tick.
pub async fn get_downloads(State(state): State<AppState>) -> impl IntoResponse {
    let response = DownloadsResponse {
        active: state
            .store
            .list_active()
            .await
            .into_iter()
            .map(ActiveDownload::from)
            .collect(),
        completed: state.store.list_completed().await,
    };

    (StatusCode::OK, Json(response))
}

/// Submit a URL for download (POST /api/download)
///
/// Dispatches to the first handler that claims the URL, with the engine
/// daemon as the fallback for everything else. The returned id is what
/// pause/resume/cancel expect.
pub async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::InvalidPayload("url must not be empty".into()));
    }

    let receipt = state.coordinator.submit(url).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id: receipt.id,
            backend: receipt.backend,
        }),
    ))
}

/// Pause a download (POST /api/download/{id}/pause)
pub async fn pause_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.coordinator.pause(&id).await?;
    action_response(outcome, &id, "paused")
}

/// Resume a paused download (POST /api/download/{id}/resume)
pub async fn resume_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.coordinator.resume(&id).await?;
    action_response(outcome, &id, "resumed")
}

/// Cancel a download (POST /api/download/{id}/cancel)
///
/// Cancellation is cooperative; the transfer stops at its next checkpoint
/// and never produces a completed record.
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.coordinator.cancel(&id).await?;
    action_response(outcome, &id, "cancelled")
}

fn action_response(
    outcome: ControlOutcome,
    id: &str,
    status: &'static str,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    match outcome {
        ControlOutcome::Ok => Ok((StatusCode::OK, Json(ActionResponse { status }))),
        ControlOutcome::Unsupported => Err(ApiError::Unsupported(id.to_string())),
        ControlOutcome::NotFound => Err(ApiError::NotFound(format!("job {id}"))),
    }
}

/// Remove a completed download (POST /api/completed/{id}/delete)
///
/// Drops the history entry; with `delete_file` also removes the file from
/// disk. A file that is already gone does not fail the request.
pub async fn delete_completed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<DeleteRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let delete_file = request.map(|Json(r)| r.delete_file).unwrap_or(false);

    state.coordinator.delete_completed(&id, delete_file).await?;

    Ok((StatusCode::OK, Json(ActionResponse { status: "deleted" })))
}

/// Serve a completed download's file (GET /api/file/{id})
///
/// Looks the id up in the completed history and returns the file as an
/// attachment. Unknown ids and files no longer on disk both answer 404.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get_completed(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;

    if record.file_path.is_empty() {
        return Err(ApiError::NotFound(format!("file for job {id}")));
    }

    let bytes = tokio::fs::read(&record.file_path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(format!("file for job {id}"))
        } else {
            ApiError::Internal(err.to_string())
        }
    })?;

    let headers = [
        (
            header::CONTENT_TYPE,
            mime::APPLICATION_OCTET_STREAM.as_ref().to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", record.name),
        ),
    ];

    Ok((StatusCode::OK, headers, bytes))
}

/// Rebuild the handler registry (POST /api/handlers/reload)
///
/// Re-runs the availability checks, so a yt-dlp binary installed after
/// startup becomes usable without a restart. Returns the post-reload list.
pub async fn reload_handlers(State(state): State<AppState>) -> impl IntoResponse {
    state
        .coordinator
        .reload_handlers(&state.config.handlers)
        .await;

    let handlers = state
        .coordinator
        .handler_names()
        .await
        .into_iter()
        .map(str::to_owned)
        .collect();

    let response = HandlersResponse {
        handlers,
        engine_available: state.coordinator.engine_available(),
    };

    (StatusCode::OK, Json(response))
}

/// Aggregate counters (GET /api/stats)
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.coordinator.stats().await;

    let response = StatsResponse {
        active_count: stats.active_count,
        completed_count: stats.completed_count,
        aggregate_rate_bps: stats.aggregate_rate_bps,
        aggregate_rate: humanize::format_rate(stats.aggregate_rate_bps),
    };

    (StatusCode::OK, Json(response))
}

/// Registered handlers and engine availability (GET /api/handlers)
pub async fn list_handlers(State(state): State<AppState>) -> impl IntoResponse {
    let handlers = state
        .coordinator
        .handler_names()
        .await
        .into_iter()
        .map(str::to_owned)
        .collect();

    let response = HandlersResponse {
        handlers,
        engine_available: state.coordinator.engine_available(),
    };

    (StatusCode::OK, Json(response))
}

/// Effective runtime configuration (GET /api/config)
///
/// Secrets never appear here; the engine RPC token is excluded from
/// serialization at the config layer.
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let handlers = state
        .coordinator
        .handler_names()
        .await
        .into_iter()
        .map(str::to_owned)
        .collect();

    let response = ConfigResponse {
        download_dir: state.config.downloads.dir.display().to_string(),
        engine_enabled: state.config.engine.enabled,
        reconcile_interval_ms: state.config.reconciler.interval_ms,
        handlers,
    };

    (StatusCode::OK, Json(response))
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("store".to_string(), "healthy".to_string());
    components.insert(
        "engine".to_string(),
        if state.coordinator.engine_available() {
            "configured".to_string()
        } else {
            "disabled".to_string()
        },
    );

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}
