//! HTTP handlers for batch resume analysis.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::analysis::controller::{CancelAck, ResultsReport, RunAck, StatusReport};
use crate::errors::AppError;
use crate::state::AppState;

/// POST /api/v1/jobs/:job_id/analysis
/// Starts analysis of every applicant that has no result yet.
pub async fn handle_initiate(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAck>), AppError> {
    let started = state.analysis.initiate(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(started.ack)))
}

/// POST /api/v1/jobs/:job_id/analysis/rerun
pub async fn handle_rerun(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAck>), AppError> {
    let started = state.analysis.rerun(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(started.ack)))
}

/// GET /api/v1/jobs/:job_id/analysis
pub async fn handle_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusReport>, AppError> {
    Ok(Json(state.analysis.status(job_id).await?))
}

/// GET /api/v1/jobs/:job_id/analysis/results
pub async fn handle_results(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ResultsReport>, AppError> {
    Ok(Json(state.analysis.results(job_id).await?))
}

/// POST /api/v1/jobs/:job_id/analysis/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CancelAck>), AppError> {
    let ack = state.analysis.cancel(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}
