//! Dispatcher-owned run directory: maps `runId` to its
//! `RunActorHandle` plus the small bookkeeping (`brain filename`,
//! timestamps) the wire contract's run summary needs beyond what the
//! pure event log tracks.
//!
//! Generalizes `loom`'s "explicit Registry object the dispatcher receives
//! at construction" pattern from brain lookup alone to also cover the
//! per-run actor table a dispatcher needs to route
//! `watch`/`kill`/webhook requests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use weave::{BrainRegistry, EventLog, LlmClient, RunActorHandle};

/// One run's dispatcher-side bookkeeping. `actor` is the single source of
/// truth for status/progress (via the shared [`EventLog`]); the fields here
/// exist only because the event log itself carries no wall-clock
/// timestamps.
pub struct RunEntry {
    pub actor: RunActorHandle,
    pub brain_filename: String,
    pub brain_title: String,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Mutex<Option<i64>>,
}

pub struct AppState {
    pub registry: BrainRegistry,
    pub llm: Arc<dyn LlmClient>,
    pub log: Arc<dyn EventLog>,
    pub runs: RwLock<HashMap<String, Arc<RunEntry>>>,
}

impl AppState {
    pub fn new(registry: BrainRegistry, llm: Arc<dyn LlmClient>, log: Arc<dyn EventLog>) -> Arc<Self> {
        Arc::new(Self { registry, llm, log, runs: RwLock::new(HashMap::new()) })
    }

    pub async fn insert_run(&self, run_id: String, entry: Arc<RunEntry>) {
        self.runs.write().await.insert(run_id, entry);
    }

    pub async fn get_run(&self, run_id: &str) -> Option<Arc<RunEntry>> {
        self.runs.read().await.get(run_id).cloned()
    }

    pub async fn runs_for_brain(&self, brain_filename: &str) -> Vec<(String, Arc<RunEntry>)> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.brain_filename == brain_filename)
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    pub async fn all_runs(&self) -> Vec<(String, Arc<RunEntry>)> {
        self.runs.read().await.iter().map(|(id, entry)| (id.clone(), Arc::clone(entry))).collect()
    }
}

/// Spawns the background task that records `completed_at_ms` the moment a
/// run's event log reaches a root-terminal event. The task exits on its own
/// once the terminal event is observed or the watch channel closes.
pub fn track_completion(entry: Arc<RunEntry>, mut watch: tokio::sync::mpsc::Receiver<weave::Event>) {
    tokio::spawn(async move {
        while let Some(event) = watch.recv().await {
            if event.kind.is_root_terminal() {
                let mut guard = entry.completed_at_ms.lock().await;
                *guard = Some(now_ms());
                tracing::info!(run_id = %event.run_id, "run reached terminal state");
                break;
            }
        }
    });
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
