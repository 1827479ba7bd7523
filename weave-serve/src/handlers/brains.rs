//! `/brains*` handlers: registry listing/search, brain
//! structure, and per-brain run queries.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::IntervalStream;

use weave::{project, MatchOutcome};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BrainListing {
    pub filename: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BrainListResponse {
    pub brains: Vec<BrainListing>,
    pub count: usize,
}

/// `GET /brains` (with optional `?q=`).
pub async fn list_brains(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Json<BrainListResponse> {
    let q = params.get("q").map(String::as_str).unwrap_or("");
    let matches = state.registry.search(q);
    let brains: Vec<BrainListing> = matches
        .into_iter()
        .map(|entry| BrainListing { filename: entry.filename.clone(), title: entry.brain.title.clone(), description: entry.brain.description.clone() })
        .collect();
    let count = brains.len();
    Json(BrainListResponse { brains, count })
}

#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub title: String,
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BrainStructure {
    pub filename: String,
    pub title: String,
    pub description: Option<String>,
    pub steps: Vec<StepSummary>,
}

fn block_kind(block: &weave::Block) -> &'static str {
    match block {
        weave::Block::Step { .. } => "step",
        weave::Block::Batch(_) => "batch",
        weave::Block::Agent { .. } => "agent",
        weave::Block::Brain(_) => "brain",
        weave::Block::Guard { .. } => "guard",
        weave::Block::Wait { .. } => "wait",
        weave::Block::Ui { .. } => "ui",
    }
}

/// `GET /brains/:identifier`: brain structure with its nested `steps[]`.
pub async fn get_brain(State(state): State<Arc<AppState>>, Path(identifier): Path<String>) -> Result<Json<BrainStructure>, ApiError> {
    match state.registry.resolve(&identifier) {
        MatchOutcome::Unique(brain) => Ok(Json(BrainStructure {
            filename: identifier,
            title: brain.title.clone(),
            description: brain.description.clone(),
            steps: brain.blocks.iter().map(|b| StepSummary { title: b.title().to_string(), kind: block_kind(b) }).collect(),
        })),
        MatchOutcome::None => Err(ApiError(weave::DispatchError::NotFound(identifier))),
        MatchOutcome::Multiple(candidates) => Err(ApiError(weave::DispatchError::Ambiguous(identifier, candidates))),
    }
}

async fn resolved_filename(state: &AppState, identifier: &str) -> Result<String, ApiError> {
    match state.registry.resolve(identifier) {
        MatchOutcome::Unique(_) => Ok(identifier.to_string()),
        MatchOutcome::None => Err(ApiError(weave::DispatchError::NotFound(identifier.to_string()))),
        MatchOutcome::Multiple(candidates) => Err(ApiError(weave::DispatchError::Ambiguous(identifier.to_string(), candidates))),
    }
}

/// `GET /brains/:identifier/active-runs`: runs currently RUNNING.
pub async fn active_runs(State(state): State<Arc<AppState>>, Path(identifier): Path<String>) -> Result<Json<Vec<Value>>, ApiError> {
    let filename = resolved_filename(&state, &identifier).await?;
    let mut out = Vec::new();
    for (run_id, entry) in state.runs_for_brain(&filename).await {
        if let Ok(events) = state.log.scan(&run_id, 0).await {
            let status = project(&events).status();
            if status == weave::RunStatus::Running {
                out.push(json!({"brainRunId": run_id, "brainTitle": entry.brain_title, "status": status}));
            }
        }
    }
    Ok(Json(out))
}

#[derive(Debug, serde::Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// `GET /brains/:identifier/history`.
pub async fn history(State(state): State<Arc<AppState>>, Path(identifier): Path<String>, Query(params): Query<HistoryParams>) -> Result<Json<Vec<Value>>, ApiError> {
    let filename = resolved_filename(&state, &identifier).await?;
    let mut runs = state.runs_for_brain(&filename).await;
    runs.sort_by(|a, b| b.1.created_at_ms.cmp(&a.1.created_at_ms));
    if let Some(limit) = params.limit {
        runs.truncate(limit);
    }
    let mut out = Vec::new();
    for (run_id, entry) in runs {
        if let Ok(events) = state.log.scan(&run_id, 0).await {
            let projection = project(&events);
            out.push(json!({
                "brainRunId": run_id,
                "brainTitle": entry.brain_title,
                "status": projection.status(),
                "createdAt": entry.created_at_ms,
                "completedAt": *entry.completed_at_ms.lock().await,
            }));
        }
    }
    Ok(Json(out))
}

/// `GET /brains/watch`: SSE of all currently-running brains' top-level
/// snapshots. No per-run push channel exists at this scope, so
/// a periodic snapshot tick stands in for "currently running" (the
/// per-run `/watch` stream remains the source of gap-free per-run events).
pub async fn watch_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = IntervalStream::new(tokio::time::interval(std::time::Duration::from_millis(500))).then(move |_| {
        let state = Arc::clone(&state);
        async move {
            let mut snapshot = Vec::new();
            for (run_id, entry) in state.all_runs().await {
                if let Ok(events) = state.log.scan(&run_id, 0).await {
                    let status = project(&events).status();
                    if status == weave::RunStatus::Running {
                        snapshot.push(json!({"brainRunId": run_id, "brainTitle": entry.brain_title, "status": status}));
                    }
                }
            }
            Ok::<_, std::convert::Infallible>(SseEvent::default().data(Value::Array(snapshot).to_string()))
        }
    });
    Sse::new(stream)
}
