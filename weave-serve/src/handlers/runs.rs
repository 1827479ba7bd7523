//! `/brains/runs*` and `/webhooks/:slug` handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use weave::{project, reconstruct_resume_context, MatchOutcome, RunActor, RunStatus};

use crate::error::ApiError;
use crate::sse::envelope_stream;
use crate::state::{now_ms, track_completion, AppState, RunEntry};

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub identifier: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    #[serde(rename = "brainRunId")]
    pub brain_run_id: String,
}

/// `POST /brains/runs`.
pub async fn start_run(State(state): State<Arc<AppState>>, Json(req): Json<StartRunRequest>) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let brain = resolve_unique(&state, &req.identifier)?;
    let run_id = Uuid::new_v4().to_string();

    let actor = RunActor::new(run_id.clone(), Arc::clone(&brain), Arc::clone(&state.log), Arc::clone(&state.llm));
    actor.start(Value::Object(Default::default()), req.options).await.map_err(ApiError::from)?;

    register_run(&state, run_id.clone(), Arc::clone(&actor), req.identifier, brain.title.clone()).await;
    Ok((StatusCode::CREATED, Json(StartRunResponse { brain_run_id: run_id })))
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    #[serde(rename = "brainRunId")]
    pub brain_run_id: String,
    #[serde(rename = "brainTitle")]
    pub brain_title: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: RunStatus,
    pub options: Value,
    pub error: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "startedAt")]
    pub started_at: Option<i64>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<i64>,
}

async fn build_summary(state: &AppState, run_id: &str, entry: &RunEntry) -> Result<RunSummary, ApiError> {
    let events = state.log.scan(run_id, 0).await.map_err(|e| ApiError(weave::DispatchError::Actor(weave::ActorError::Log(e))))?;
    let projection = project(&events);
    let options = events.last().map(|e| Value::Object(e.options.clone().into_iter().collect())).unwrap_or(Value::Null);
    Ok(RunSummary {
        brain_run_id: run_id.to_string(),
        brain_title: entry.brain_title.clone(),
        kind: "brain",
        status: projection.status(),
        options,
        error: projection.terminal_error.clone(),
        created_at: entry.created_at_ms,
        started_at: entry.started_at_ms,
        completed_at: *entry.completed_at_ms.lock().await,
    })
}

/// `GET /brains/runs/:runId`.
pub async fn get_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<RunSummary>, ApiError> {
    let entry = state.get_run(&run_id).await.ok_or_else(|| ApiError(weave::DispatchError::RunNotFound(run_id.clone())))?;
    Ok(Json(build_summary(&state, &run_id, &entry).await?))
}

/// `GET /brains/runs/:runId/watch`: SSE, historical then live.
pub async fn watch_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let entry = state.get_run(&run_id).await.ok_or_else(|| ApiError(weave::DispatchError::RunNotFound(run_id.clone())))?;
    let rx = entry.actor.watch().await.map_err(ApiError::from)?;
    Ok(Sse::new(envelope_stream(rx)))
}

/// `DELETE /brains/runs/:runId`: idempotent kill.
pub async fn kill_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<StatusCode, ApiError> {
    let entry = state.get_run(&run_id).await.ok_or_else(|| ApiError(weave::DispatchError::RunNotFound(run_id.clone())))?;
    entry.actor.kill().await.map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RerunRequest {
    pub identifier: String,
    #[serde(rename = "runId")]
    pub run_id: Option<String>,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<u64>,
    #[serde(rename = "stopsAfter")]
    pub stops_after: Option<u64>,
}

/// `POST /brains/runs/rerun`: reconstructs a `resumeContext` from a prefix of a source run's
/// event log and starts a brand-new run from it.
pub async fn rerun(State(state): State<Arc<AppState>>, Json(req): Json<RerunRequest>) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let brain = resolve_unique(&state, &req.identifier)?;
    let new_run_id = Uuid::new_v4().to_string();

    let mut seeded_options: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(source_run_id) = &req.run_id {
        let source_events = state.log.scan(source_run_id, 0).await.map_err(|e| ApiError(weave::DispatchError::Actor(weave::ActorError::Log(e))))?;
        // `startsAt` is accepted but only `stopsAfter` truncation is
        // implemented here; events before `startsAt` are still replayed so
        // the new run's log is a faithful prefix of the source.
        let _ = req.starts_at;
        let prefix: Vec<_> = match req.stops_after {
            Some(cutoff) => source_events.into_iter().filter(|e| e.seq <= cutoff).collect(),
            None => source_events,
        };
        for event in &prefix {
            seeded_options = event.options.clone();
            let _ = state.log.append(&new_run_id, event.kind.clone(), event.options.clone()).await;
        }
    }

    let new_events = state.log.scan(&new_run_id, 0).await.unwrap_or_default();
    let resume_ctx = reconstruct_resume_context(&new_events, None);

    let actor = RunActor::new(new_run_id.clone(), Arc::clone(&brain), Arc::clone(&state.log), Arc::clone(&state.llm));
    match resume_ctx {
        Some(ctx) => actor.rerun_from(ctx, seeded_options).await.map_err(ApiError::from)?,
        None => actor.start(Value::Object(Default::default()), seeded_options).await.map_err(ApiError::from)?,
    }

    register_run(&state, new_run_id.clone(), Arc::clone(&actor), req.identifier, brain.title.clone()).await;
    Ok((StatusCode::CREATED, Json(StartRunResponse { brain_run_id: new_run_id })))
}

#[derive(Debug, Deserialize)]
pub struct WebhookSubmission {
    pub identifier: String,
    pub token: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct WebhookResult {
    pub received: bool,
    pub action: &'static str,
}

/// `POST /webhooks/:slug`: scans every
/// currently-tracked non-terminal run for a matching `(slug, identifier,
/// token)` registration. A mismatch is not an error — `{received:true,
/// action:"no-match"}` with no state change.
pub async fn deliver_webhook(State(state): State<Arc<AppState>>, Path(slug): Path<String>, Json(sub): Json<WebhookSubmission>) -> Json<WebhookResult> {
    for (_, entry) in state.all_runs().await {
        if let Ok(events) = state.log.scan(entry.actor.run_id(), 0).await {
            let projection = project(&events);
            let matched = projection.pending_webhooks.iter().any(|w| w.slug == slug && w.identifier == sub.identifier && w.token == sub.token);
            if matched {
                let outcome = entry.actor.resume_webhook(&slug, &sub.identifier, &sub.token, sub.payload.clone()).await;
                if matches!(outcome, Ok(weave::WebhookOutcome::Resumed)) {
                    return Json(WebhookResult { received: true, action: "resumed" });
                }
            }
        }
    }
    Json(WebhookResult { received: true, action: "no-match" })
}

fn resolve_unique(state: &AppState, identifier: &str) -> Result<Arc<weave::Brain>, ApiError> {
    match state.registry.resolve(identifier) {
        MatchOutcome::Unique(brain) => Ok(brain),
        MatchOutcome::None => Err(ApiError(weave::DispatchError::NotFound(identifier.to_string()))),
        MatchOutcome::Multiple(candidates) => Err(ApiError(weave::DispatchError::Ambiguous(identifier.to_string(), candidates))),
    }
}

async fn register_run(state: &Arc<AppState>, run_id: String, actor: Arc<RunActor>, brain_filename: String, brain_title: String) {
    let entry = Arc::new(RunEntry {
        actor: Arc::clone(&actor),
        brain_filename,
        brain_title,
        created_at_ms: now_ms(),
        started_at_ms: Some(now_ms()),
        completed_at_ms: tokio::sync::Mutex::new(None),
    });
    if let Ok(watch) = actor.watch().await {
        track_completion(Arc::clone(&entry), watch);
    }
    state.insert_run(run_id, entry).await;
}
