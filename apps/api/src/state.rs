use crate::analysis::controller::AnalysisController;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub analysis: AnalysisController,
}
