//! Manual run triggers.
//!
//! The same runs the scheduler performs, started on demand. Safe to call
//! while a scheduled run is in progress: farmers are processed one run at a
//! time and already-processed days are never counted again.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::{AppError, ErrorResponse};
use crate::services::engine::{Engine, RunSummary, RunTarget};

/// Bring every farmer's GDD up to yesterday.
#[utoipa::path(
    post,
    path = "/api/v1/catch-up",
    tag = "Runs",
    responses(
        (status = 200, description = "Catch-up summary", body = RunSummary),
    )
)]
pub async fn catch_up_all(State(engine): State<Engine>) -> Result<Json<RunSummary>, AppError> {
    let summary = engine
        .run_catch_up(RunTarget::All, Utc::now().date_naive())
        .await?;
    Ok(Json(summary))
}

/// Bring one farmer's GDD up to yesterday.
#[utoipa::path(
    post,
    path = "/api/v1/farmers/{id}/catch-up",
    tag = "Runs",
    params(
        ("id" = Uuid, Path, description = "Farmer UUID"),
    ),
    responses(
        (status = 200, description = "Catch-up summary", body = RunSummary),
        (status = 404, description = "Farmer not found", body = ErrorResponse),
    )
)]
pub async fn catch_up_farmer(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSummary>, AppError> {
    let summary = engine
        .run_catch_up(RunTarget::Farmer(id), Utc::now().date_naive())
        .await?;
    Ok(Json(summary))
}

/// Record today's soil moisture for every farmer.
#[utoipa::path(
    post,
    path = "/api/v1/moisture-refresh",
    tag = "Runs",
    responses(
        (status = 200, description = "Moisture refresh summary", body = RunSummary),
    )
)]
pub async fn moisture_refresh_all(
    State(engine): State<Engine>,
) -> Result<Json<RunSummary>, AppError> {
    let summary = engine
        .run_moisture_refresh(RunTarget::All, Utc::now().date_naive())
        .await?;
    Ok(Json(summary))
}
