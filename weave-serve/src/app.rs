//! Axum router: wires the REST+SSE routes onto the handlers.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{brains, runs};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/brains/runs", post(runs::start_run))
        .route("/brains/runs/rerun", post(runs::rerun))
        .route("/brains/runs/:run_id", get(runs::get_run).delete(runs::kill_run))
        .route("/brains/runs/:run_id/watch", get(runs::watch_run))
        .route("/webhooks/:slug", post(runs::deliver_webhook))
        .route("/brains", get(brains::list_brains))
        .route("/brains/watch", get(brains::watch_all))
        .route("/brains/:identifier", get(brains::get_brain))
        .route("/brains/:identifier/active-runs", get(brains::active_runs))
        .route("/brains/:identifier/history", get(brains::history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
