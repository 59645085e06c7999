pub mod analysis;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/jobs/:job_id/analysis",
            post(analysis::handle_initiate).get(analysis::handle_status),
        )
        .route(
            "/api/v1/jobs/:job_id/analysis/results",
            get(analysis::handle_results),
        )
        .route(
            "/api/v1/jobs/:job_id/analysis/cancel",
            post(analysis::handle_cancel),
        )
        .route(
            "/api/v1/jobs/:job_id/analysis/rerun",
            post(analysis::handle_rerun),
        )
        .with_state(state)
}
