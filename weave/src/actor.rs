//! The Run Actor: one per `runId`, owning the event log
//! handle, the subscriber fan-out, the signal mailbox, and at most one live
//! executor task.
//!
//! Grounded in `serve::run`'s `handle_run`/`run_agent_task` spawn-and-watch
//! shape, generalized from a single WebSocket connection's lifecycle to an
//! arbitrary number of concurrent watchers per run.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::block::Brain;
use crate::error::{ActorError, RunError, WebhookOutcome};
use crate::event::{Event, EventKind};
use crate::generator::{self, GeneratorServices, ResumeContext, WebhookResponsePayload};
use crate::llm::LlmClient;
use crate::log::EventLog;
use crate::signal::{Signal, SignalMailbox};
use crate::statemachine::tree::{BrainNode, StepStatus};
use crate::statemachine::{apply_patch, project, Projection};

/// Shared handle type dispatchers key by `runId`.
pub type RunActorHandle = Arc<RunActor>;

#[derive(Default)]
struct ActorInner {
    mailbox_tx: Option<mpsc::UnboundedSender<Signal>>,
    executor: Option<tokio::task::JoinHandle<()>>,
}

/// One actor per run. `brain` and `llm` are process-local collaborators
/// supplied fresh at construction — they are never persisted, since a
/// `Brain`'s blocks close over caller code.
pub struct RunActor {
    run_id: String,
    log: Arc<dyn EventLog>,
    brain: Arc<Brain>,
    llm: Arc<dyn LlmClient>,
    inner: Mutex<ActorInner>,
}

impl RunActor {
    pub fn new(run_id: impl Into<String>, brain: Arc<Brain>, log: Arc<dyn EventLog>, llm: Arc<dyn LlmClient>) -> Arc<Self> {
        Arc::new(Self { run_id: run_id.into(), brain, log, llm, inner: Mutex::new(ActorInner::default()) })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `start(brain, initialState, options)`: appends `START`
    /// via the generator itself (the generator emits it when `resume` is
    /// `None`), then spawns the executor.
    pub async fn start(self: &Arc<Self>, initial_state: Value, options: BTreeMap<String, Value>) -> Result<(), ActorError> {
        if self.log.is_terminal(&self.run_id).await {
            return Err(ActorError::AlreadyTerminal(self.run_id.clone()));
        }
        tracing::info!(run_id = %self.run_id, "starting run");
        self.spawn_executor(initial_state, None, options).await
    }

    /// `resume()`: matches an inbound webhook submission
    /// against the last registered `(slug, identifier, token)` set. A
    /// mismatch is not an error — it is reported as
    /// [`WebhookOutcome::NoMatch`] without touching any state.
    pub async fn resume_webhook(self: &Arc<Self>, slug: &str, identifier: &str, token: &str, response: Value) -> Result<WebhookOutcome, ActorError> {
        if self.log.is_terminal(&self.run_id).await {
            return Err(ActorError::AlreadyTerminal(self.run_id.clone()));
        }
        let events = self.log.scan(&self.run_id, 0).await?;
        let projection = project(&events);
        let matched = projection.pending_webhooks.iter().any(|w| w.slug == slug && w.identifier == identifier && w.token == token);
        if !matched {
            tracing::debug!(run_id = %self.run_id, slug, identifier, "webhook submission does not match any pending registration");
            return Ok(WebhookOutcome::NoMatch);
        }
        tracing::info!(run_id = %self.run_id, slug, identifier, "resuming run from webhook");

        let options = events.last().map(|e| e.options.clone()).unwrap_or_default();
        let payload = WebhookResponsePayload { slug: slug.to_string(), identifier: identifier.to_string(), response };
        let resume_ctx = reconstruct_resume_context(&events, Some(payload))
            .ok_or_else(|| ActorError::Run(RunError::UnknownResumeTarget(format!("run {} has no resumable state", self.run_id))))?;

        // Placing a WEBHOOK_RESPONSE signal in the mailbox assumes an
        // already-live executor; here a fresh executor is always spawned
        // instead, and the matched response travels directly on
        // `resumeContext.webhookResponse` rather than through a mailbox
        // nobody is yet listening on.
        let state = resume_ctx.state.clone();
        self.spawn_executor(state, Some(resume_ctx), options).await?;
        Ok(WebhookOutcome::Resumed)
    }

    /// Reruns this actor's run from an already-reconstructed [`ResumeContext`]
    /// (backs `rerun`'s `startsAt`/`stopsAfter`): the dispatcher builds
    /// `resume` by truncating a *source* run's event log
    /// to `stopsAfter` and projecting it, then seeds this actor's own (fresh)
    /// log with that prefix before calling this. Shares `spawn_executor` with
    /// `start`/`resume_webhook` so the at-most-one-live-executor invariant
    /// applies identically.
    pub async fn rerun_from(self: &Arc<Self>, resume: ResumeContext, options: BTreeMap<String, Value>) -> Result<(), ActorError> {
        if self.log.is_terminal(&self.run_id).await {
            return Err(ActorError::AlreadyTerminal(self.run_id.clone()));
        }
        let state = resume.state.clone();
        self.spawn_executor(state, Some(resume), options).await
    }

    /// `kill()`: idempotent. If an executor is live, signals
    /// it to stop at the next suspension point; if the run is merely
    /// waiting/paused (no live executor), appends `CANCELLED` directly and
    /// clears pending webhooks via the projection the next `watch()` sees.
    pub async fn kill(&self) -> Result<(), ActorError> {
        if self.log.is_terminal(&self.run_id).await {
            return Ok(());
        }
        let inner = self.inner.lock().await;
        match &inner.mailbox_tx {
            Some(tx) => {
                tracing::info!(run_id = %self.run_id, "kill signal sent to live executor");
                let _ = tx.send(Signal::Kill);
                Ok(())
            }
            None => {
                drop(inner);
                tracing::info!(run_id = %self.run_id, "kill with no live executor, appending CANCELLED directly");
                let options = self.last_known_options().await;
                self.log.append(&self.run_id, EventKind::Cancelled, options).await?;
                self.log.mark_terminal(&self.run_id).await;
                Ok(())
            }
        }
    }

    /// `pause()`: a no-op when no executor is live — there is
    /// nothing to interrupt.
    pub async fn pause(&self) -> Result<(), ActorError> {
        let inner = self.inner.lock().await;
        if let Some(tx) = &inner.mailbox_tx {
            let _ = tx.send(Signal::Pause);
        }
        Ok(())
    }

    /// `sendUserMessage(content)`: only meaningful mid agent
    /// loop; silently dropped if no executor is live.
    pub async fn send_user_message(&self, content: String) -> Result<(), ActorError> {
        let inner = self.inner.lock().await;
        if let Some(tx) = &inner.mailbox_tx {
            let _ = tx.send(Signal::UserMessage { content });
        }
        Ok(())
    }

    /// `watch()`: full historical scan, then the live tail,
    /// exactly once per event. Uses `scan_and_subscribe` so the two halves
    /// happen under one lock — a `scan` followed by a separate `subscribe`
    /// can lose an event appended in between.
    pub async fn watch(&self) -> Result<mpsc::Receiver<Event>, ActorError> {
        let (historical, mut sub) = self.log.scan_and_subscribe(&self.run_id, 0).await?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            for ev in historical {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
            while let Some(ev) = sub.receiver.recv().await {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn last_known_options(&self) -> BTreeMap<String, Value> {
        self.log.scan(&self.run_id, 0).await.ok().and_then(|events| events.last().map(|e| e.options.clone())).unwrap_or_default()
    }

    /// Spawns the executor task: one subtask drains generator-yielded
    /// `EventKind`s and appends them through the log (marking the run
    /// terminal on a root-terminal event), the other drives
    /// [`generator::run`] itself. Enforces the "at most one live executor"
    /// invariant.
    async fn spawn_executor(self: &Arc<Self>, initial_state: Value, resume: Option<ResumeContext>, options: BTreeMap<String, Value>) -> Result<(), ActorError> {
        let mut inner = self.inner.lock().await;
        if inner.mailbox_tx.is_some() {
            return Err(ActorError::ExecutorAlreadyRunning(self.run_id.clone()));
        }

        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::channel::<EventKind>(256);

        let log = Arc::clone(&self.log);
        let run_id = self.run_id.clone();
        let append_options = options.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(kind) = events_rx.recv().await {
                let is_terminal = kind.is_root_terminal();
                if log.append(&run_id, kind, append_options.clone()).await.is_ok() && is_terminal {
                    log.mark_terminal(&run_id).await;
                }
            }
        });

        let actor = Arc::clone(self);
        let brain = Arc::clone(&self.brain);
        let llm = Arc::clone(&self.llm);
        let run_id = self.run_id.clone();
        let executor = tokio::spawn(async move {
            let mut mailbox = SignalMailbox::new(mailbox_rx);
            let services = GeneratorServices { llm: llm.as_ref() };
            let _outcome = generator::run(&brain, &run_id, None, "", &options, initial_state, resume, &mut mailbox, &services, &events_tx).await;
            drop(events_tx);
            let _ = forwarder.await;
            let mut inner = actor.inner.lock().await;
            inner.mailbox_tx = None;
            inner.executor = None;
        });

        inner.mailbox_tx = Some(mailbox_tx);
        inner.executor = Some(executor);
        Ok(())
    }
}

/// Derives a [`ResumeContext`] chain by replaying the full event log through
/// [`project`] and reading its Running-Brain Tree back into resume-shaped
/// records. Returns `None` if
/// the run never started or is already terminal.
pub fn reconstruct_resume_context(events: &[Event], webhook: Option<WebhookResponsePayload>) -> Option<ResumeContext> {
    let projection = project(events);
    if projection.status().is_terminal() {
        return None;
    }
    let root = projection.root_brain.as_ref()?;
    Some(build_resume_chain(root, &projection, webhook))
}

fn build_resume_chain(node: &BrainNode, projection: &Projection, webhook: Option<WebhookResponsePayload>) -> ResumeContext {
    let is_root = node.parent_step_id.is_none();
    let state = if is_root { projection.current_state.clone() } else { fold_node_state(node) };

    match &node.inner_brain {
        Some(inner) => {
            let step_index = node
                .steps
                .iter()
                .position(|s| s.status == StepStatus::Running)
                .unwrap_or_else(|| node.steps.len().saturating_sub(1));
            let inner_ctx = build_resume_chain(inner, projection, webhook);
            ResumeContext { state, step_index, webhook_response: None, agent_context: None, batch_progress: None, inner_resume_context: Some(Box::new(inner_ctx)), page: None }
        }
        None => {
            let step_index = projection
                .current_step_id
                .as_deref()
                .and_then(parse_step_index)
                .or_else(|| node.steps.iter().position(|s| s.status == StepStatus::Running))
                .unwrap_or(node.steps.len());
            ResumeContext {
                state,
                step_index,
                webhook_response: webhook,
                agent_context: projection.agent_context.clone(),
                batch_progress: projection.batch_progress.clone(),
                inner_resume_context: None,
                // No event records a UI page's content across a crash/replay; a
                // webhook-driven reconstruction loses it, unlike a live in-process resume.
                page: None,
            }
        }
    }
}

/// Step ids are `{prefix}s{index}` with nested prefixes dot-joined; recovers `index` from the trailing
/// segment.
fn parse_step_index(step_id: &str) -> Option<usize> {
    let last_segment = step_id.rsplit('.').next().unwrap_or(step_id);
    last_segment.strip_prefix('s').and_then(|n| n.parse().ok())
}

/// Folds a nested brain node's own `STEP_COMPLETE` patches into its private
/// state object. Top-level state lives on the projection directly
/// (`current_state`); nested state is never folded there, so it is reconstructed here instead.
fn fold_node_state(node: &BrainNode) -> Value {
    let mut state = Value::Object(Default::default());
    for step in &node.steps {
        if let Some(patch) = &step.patch {
            apply_patch(&mut state, patch);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Brain, StepContext, StepExecutor, StepOutcome};
    use crate::error::RunError;
    use crate::llm::{LlmResponse, ScriptedLlmClient};
    use crate::log::MemoryEventLog;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Increment(Arc<AtomicUsize>);
    #[async_trait]
    impl StepExecutor for Increment {
        async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let mut obj = state.as_object().cloned().unwrap_or_default();
            obj.insert("count".into(), serde_json::json!(obj.get("count").and_then(Value::as_i64).unwrap_or(0) + 1));
            Ok(StepOutcome::State(Value::Object(obj)))
        }
    }

    fn two_step_brain(calls: Arc<AtomicUsize>) -> Brain {
        Brain::new(
            "Counter",
            vec![
                Block::Step { title: "A".into(), executor: Arc::new(Increment(Arc::clone(&calls))) },
                Block::Step { title: "B".into(), executor: Arc::new(Increment(calls)) },
            ],
        )
    }

    /// **Scenario**: `start()` runs a two-step brain to completion and the
    /// event log ends up marked terminal with a COMPLETE event.
    #[tokio::test]
    async fn start_runs_brain_to_completion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let brain = Arc::new(two_step_brain(calls));
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
        let actor = RunActor::new("run-1", brain, log.clone(), llm);

        actor.start(Value::Object(Default::default()), BTreeMap::new()).await.unwrap();

        for _ in 0..50 {
            if log.is_terminal("run-1").await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(log.is_terminal("run-1").await);

        let events = log.scan("run-1", 0).await.unwrap();
        let projection = project(&events);
        assert_eq!(projection.status(), crate::run::RunStatus::Complete);
        assert_eq!(projection.current_state["count"], serde_json::json!(2));
    }

    /// **Scenario**: `kill()` on a run with no live executor appends
    /// CANCELLED directly and is idempotent.
    #[tokio::test]
    async fn kill_without_live_executor_appends_cancelled_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let brain = Arc::new(two_step_brain(calls));
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
        let actor = RunActor::new("run-2", brain, log.clone(), llm);

        log.append("run-2", EventKind::Start { options: Value::Null, title: "Counter".into(), parent_step_id: None }, BTreeMap::new()).await.unwrap();
        log.append("run-2", EventKind::Webhook { wait_for: vec![] }, BTreeMap::new()).await.unwrap();

        actor.kill().await.unwrap();
        assert!(log.is_terminal("run-2").await);
        actor.kill().await.unwrap();

        let events = log.scan("run-2", 0).await.unwrap();
        let cancelled_count = events.iter().filter(|e| matches!(e.kind, EventKind::Cancelled)).count();
        assert_eq!(cancelled_count, 1);
    }

    /// **Scenario**: `resume_webhook` with a token that doesn't match any
    /// pending registration reports `NoMatch` and leaves the log untouched.
    #[tokio::test]
    async fn resume_webhook_no_match_leaves_state_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let brain = Arc::new(two_step_brain(calls));
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![LlmResponse { messages: vec![], tokens_used: 0, text: None, tool_calls: vec![] }]));
        let actor = RunActor::new("run-3", brain, log.clone(), llm);

        log.append("run-3", EventKind::Start { options: Value::Null, title: "Counter".into(), parent_step_id: None }, BTreeMap::new()).await.unwrap();
        log.append(
            "run-3",
            EventKind::Webhook { wait_for: vec![crate::event::WebhookRegistration { slug: "slack".into(), identifier: "t1".into(), token: "tok".into() }] },
            BTreeMap::new(),
        )
        .await
        .unwrap();

        let outcome = actor.resume_webhook("slack", "t1", "wrong-token", Value::Null).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::NoMatch));
        let events = log.scan("run-3", 0).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    /// **Scenario**: reconstructing a resume context from a root-level
    /// WEBHOOK mid-run recovers the correct step index and folded state.
    #[test]
    fn reconstruct_resume_context_recovers_step_index_and_state() {
        let events = vec![
            Event::new("r1", 1, EventKind::Start { options: Value::Null, title: "Counter".into(), parent_step_id: None }, BTreeMap::new()),
            Event::new("r1", 2, EventKind::StepStart { step_id: "s0".into(), title: "A".into() }, BTreeMap::new()),
            Event::new("r1", 3, EventKind::StepComplete { step_id: "s0".into(), patch: vec![serde_json::json!({"op": "add", "path": "/count", "value": 1})] }, BTreeMap::new()),
            Event::new("r1", 4, EventKind::StepStart { step_id: "s1".into(), title: "Wait".into() }, BTreeMap::new()),
            Event::new(
                "r1",
                5,
                EventKind::Webhook { wait_for: vec![crate::event::WebhookRegistration { slug: "slack".into(), identifier: "t1".into(), token: "tok".into() }] },
                BTreeMap::new(),
            ),
        ];
        let payload = WebhookResponsePayload { slug: "slack".into(), identifier: "t1".into(), response: serde_json::json!({"ok": true}) };
        let ctx = reconstruct_resume_context(&events, Some(payload)).expect("resumable");
        assert_eq!(ctx.step_index, 1);
        assert_eq!(ctx.state, serde_json::json!({"count": 1}));
        assert!(ctx.webhook_response.is_some());
    }

    /// **Scenario**: a terminal run has no resume context.
    #[test]
    fn terminal_run_has_no_resume_context() {
        let events = vec![
            Event::new("r1", 1, EventKind::Start { options: Value::Null, title: "Counter".into(), parent_step_id: None }, BTreeMap::new()),
            Event::new("r1", 2, EventKind::Complete { state: Value::Null }, BTreeMap::new()),
        ];
        assert!(reconstruct_resume_context(&events, None).is_none());
    }
}
