//! HTTP request handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_common::PlaybackSnapshot;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::api::server::AppContext;
use crate::error::Error;
use crate::playback::Command;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    connected: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    teardown: bool,
}

impl Error {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidIndex(_)
            | Error::IndexOutOfRange { .. }
            | Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::UnknownAction(_) => StatusCode::NOT_FOUND,
            Error::NoCurrentTrack => StatusCode::CONFLICT,
            Error::Transport { .. } | Error::FavoriteUpdateFailed(_) => StatusCode::BAD_GATEWAY,
            Error::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn accepted() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// Health / Snapshot
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "cadence_session".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected: ctx.controller.is_connected(),
    })
}

/// GET /snapshot - latest published playback snapshot
pub async fn get_snapshot(
    State(ctx): State<AppContext>,
) -> Result<Json<PlaybackSnapshot>, Error> {
    let snapshot = ctx.controller.snapshot()?;
    Ok(Json(PlaybackSnapshot::clone(&snapshot)))
}

// ============================================================================
// Commands
// ============================================================================

/// POST /commands - typed command, JSON tagged by `type`
pub async fn post_command(
    State(ctx): State<AppContext>,
    Json(command): Json<Command>,
) -> Result<Json<StatusResponse>, Error> {
    debug!("HTTP command: {}", command);
    ctx.controller.execute(command).await?;
    Ok(accepted())
}

/// POST /actions/:name - named action through the command bus
///
/// The body is optional; when present it must be JSON.
pub async fn post_action(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<StatusResponse>, Error> {
    let payload = if body.iter().all(|b| b.is_ascii_whitespace()) {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&body).map_err(|e| Error::InvalidPayload {
                action: name.clone(),
                reason: e.to_string(),
            })?,
        )
    };

    debug!("HTTP action: {}", name);
    ctx.bus.dispatch(&name, payload).await?;
    Ok(accepted())
}

// ============================================================================
// Host lifecycle
// ============================================================================

/// POST /host/detached - host went to the background
pub async fn host_detached(State(ctx): State<AppContext>) -> Json<TeardownResponse> {
    let teardown = ctx.supervisor.on_host_detached().await;
    info!("Host detached (teardown: {})", teardown);
    Json(TeardownResponse { teardown })
}

/// POST /host/attached - host is back in the foreground
pub async fn host_attached(State(ctx): State<AppContext>) -> StatusCode {
    ctx.supervisor.on_host_attached();
    info!("Host attached");
    StatusCode::NO_CONTENT
}
