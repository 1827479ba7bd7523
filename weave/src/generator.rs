//! The Stream Generator: drives one brain's ordered block
//! list, yielding events onto a channel the actor drains and appends.
//!
//! Grounded in `loom::graph::state_graph`'s `CompiledStateGraph` node
//! ordering generalized from a general graph to a straight-line block list
//! with one `Guard` short-circuit, and in `loom::stream`'s `StreamWriter`
//! channel-write pattern.

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::agent::{self, AgentConfig, AgentOutcome};
use crate::block::{Block, Brain, StepContext, StepOutcome};
use crate::error::RunError;
use crate::event::EventKind;
use crate::llm::LlmClient;
use crate::signal::{Signal, SignalMailbox};
use crate::statemachine::agent_context::AgentContext;
use crate::statemachine::tree::{StepInfo, StepStatus};
use crate::statemachine::BatchProgress;

/// A webhook payload delivered on resume, scoped to whichever level of the
/// brain-nesting tree is actually waiting on it.
#[derive(Debug, Clone)]
pub struct WebhookResponsePayload {
    pub slug: String,
    pub identifier: String,
    pub response: Value,
}

/// Recursive, immutable resume record.
#[derive(Debug, Clone, Default)]
pub struct ResumeContext {
    pub state: Value,
    pub step_index: usize,
    pub webhook_response: Option<WebhookResponsePayload>,
    pub agent_context: Option<AgentContext>,
    pub batch_progress: Option<BatchProgress>,
    pub inner_resume_context: Option<Box<ResumeContext>>,
    /// A UI block's generated page, carried across suspend/resume so the
    /// step dispatched right after resume can read it off `StepContext`.
    pub page: Option<Value>,
}

/// How one `run()` call (root or nested) ended.
pub enum GeneratorOutcome {
    Complete { state: Value },
    Error(RunError),
    Cancelled,
    Paused,
    /// Batch chunk boundary hit a silent pause: no
    /// `PAUSED` event, caller should simply stop and await a later restart.
    SilentPause,
    Waiting { resume: ResumeContext },
}

/// Ambient services the generator needs beyond the event channel: the LLM
/// client for agent blocks. Extend here, not by growing the function's
/// positional-argument list.
pub struct GeneratorServices<'a> {
    pub llm: &'a dyn LlmClient,
}

async fn emit_async(tx: &mpsc::Sender<EventKind>, kind: EventKind) {
    let _ = tx.send(kind).await;
}

/// Serializes the current projected step tree and emits it as a
/// `STEP_STATUS` snapshot.
async fn emit_step_status(events: &mpsc::Sender<EventKind>, steps: &[StepInfo]) {
    let value = serde_json::to_value(steps).unwrap_or_else(|_| Value::Array(vec![]));
    emit_async(events, EventKind::StepStatus { steps: value }).await;
}

/// `just enough of RFC 6902` top-level diff between two JSON objects
/// (weave::event doc comment on `JsonPatch`).
fn diff_patch(before: &Value, after: &Value) -> Vec<Value> {
    let mut ops = Vec::new();
    let empty = serde_json::Map::new();
    let before_obj = before.as_object().unwrap_or(&empty);
    let after_obj = after.as_object().unwrap_or(&empty);
    for (key, value) in after_obj {
        match before_obj.get(key) {
            Some(old) if old == value => {}
            Some(_) => ops.push(serde_json::json!({"op": "replace", "path": format!("/{key}"), "value": value})),
            None => ops.push(serde_json::json!({"op": "add", "path": format!("/{key}"), "value": value})),
        }
    }
    for key in before_obj.keys() {
        if !after_obj.contains_key(key) {
            ops.push(serde_json::json!({"op": "remove", "path": format!("/{key}")}));
        }
    }
    ops
}

fn drain_control_signals(mailbox: &mut SignalMailbox) -> Option<Signal> {
    for signal in mailbox.drain() {
        if matches!(signal, Signal::Kill | Signal::Pause) {
            return Some(signal);
        }
    }
    None
}

/// Entry point for one brain's block list, root or nested. `step_id_prefix` keeps nested brains' step ids
/// distinct from their parent's.
#[allow(clippy::too_many_arguments)]
pub fn run<'a>(
    brain: &'a Brain,
    run_id: &'a str,
    parent_step_id: Option<String>,
    step_id_prefix: &'a str,
    options: &'a BTreeMap<String, Value>,
    initial_state: Value,
    resume: Option<ResumeContext>,
    mailbox: &'a mut SignalMailbox,
    services: &'a GeneratorServices<'a>,
    events: &'a mpsc::Sender<EventKind>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = GeneratorOutcome> + Send + 'a>> {
    Box::pin(async move {
        let _span = tracing::info_span!("brain_run", run_id = %run_id, brain = %brain.title, resuming = resume.is_some()).entered();

        let mut steps: Vec<StepInfo> =
            brain.blocks.iter().enumerate().map(|(i, b)| StepInfo::pending(format!("{step_id_prefix}s{i}"), b.title())).collect();

        let (mut state, mut step_index, resume_agent, resume_batch, resume_webhook, resume_inner, resume_page) = match resume {
            Some(ctx) => (ctx.state, ctx.step_index, ctx.agent_context, ctx.batch_progress, ctx.webhook_response, ctx.inner_resume_context, ctx.page),
            None => {
                emit_async(
                    events,
                    EventKind::Start { options: Value::Object(options.clone().into_iter().collect()), title: brain.title.clone(), parent_step_id: parent_step_id.clone() },
                )
                .await;
                emit_step_status(events, &steps).await;
                (initial_state, 0, None, None, None, None, None)
            }
        };

        for step in steps.iter_mut().take(step_index.min(steps.len())) {
            step.status = StepStatus::Complete;
        }

        // Carried from a resolved Wait/UI block into the first step
        // dispatched after resume, then consumed.
        let mut next_step_response: Option<Value> = None;
        let mut next_step_page: Option<Value> = None;

        // Resume an in-flight step at `step_index` before falling through to
        // the normal dispatch loop.
        if step_index < brain.blocks.len() {
            if let Some(agent_ctx) = resume_agent {
                let Block::Agent { configure, .. } = &brain.blocks[step_index] else {
                    return GeneratorOutcome::Error(RunError::UnknownResumeTarget("expected Agent block at resume index".into()));
                };
                let config = configure(&state);
                let webhook_response_tuple = resume_webhook.clone().map(|w| (w.slug, w.identifier, w.response));
                let resume_step_id = format!("{step_id_prefix}s{step_index}");
                let total_tokens_so_far = 0;
                match agent::resume_agent_loop(agent_ctx, webhook_response_tuple, config, services.llm, mailbox, events, total_tokens_so_far).await {
                    Ok(outcome) => match finish_agent_step(outcome, &mut state, step_index, &resume_step_id, events, &mut steps).await {
                        Some(result) => return result,
                        None => step_index += 1,
                    },
                    Err(e) => return GeneratorOutcome::Error(e),
                }
            } else if let Some(response) = resume_webhook {
                // Non-agent resume: a Wait/UI block's webhook resolved. Must
                // advance past the resolved block, otherwise the dispatch
                // loop below re-runs the same Wait/UI and waits forever.
                let response_value = response.response.clone();
                emit_async(events, EventKind::WebhookResponse { slug: response.slug, identifier: response.identifier, response: response.response }).await;
                steps[step_index].status = StepStatus::Complete;
                step_index += 1;
                next_step_response = Some(response_value);
                next_step_page = resume_page;
            } else if resume_batch.is_some() || resume_inner.is_some() {
                // Fall through: batch/nested-brain dispatch below consumes
                // resume_batch/resume_inner directly.
            } else {
                emit_async(events, EventKind::Resumed).await;
            }
        } else {
            emit_async(events, EventKind::Resumed).await;
        }

        let mut pending_batch_progress = resume_batch;
        let mut pending_inner_resume = resume_inner;
        let mut halted = false;

        while step_index < brain.blocks.len() {
            if let Some(signal) = drain_control_signals(mailbox) {
                match signal {
                    Signal::Kill => {
                        emit_async(events, EventKind::Cancelled).await;
                        return GeneratorOutcome::Cancelled;
                    }
                    Signal::Pause => {
                        emit_async(events, EventKind::Paused).await;
                        return GeneratorOutcome::Paused;
                    }
                    _ => {}
                }
            }

            let block = &brain.blocks[step_index];
            let step_id = format!("{step_id_prefix}s{step_index}");
            let title = block.title().to_string();
            tracing::debug!(run_id, step_id = %step_id, title = %title, halted, "dispatching block");

            if halted {
                steps[step_index].status = StepStatus::Halted;
                emit_step_status(events, &steps).await;
                step_index += 1;
                continue;
            }

            let step_response = next_step_response.take();
            let step_page = next_step_page.take();

            emit_async(events, EventKind::StepStart { step_id: step_id.clone(), title: title.clone() }).await;
            steps[step_index].status = StepStatus::Running;
            emit_step_status(events, &steps).await;

            match block {
                Block::Step { executor, .. } => {
                    let ctx = StepContext { options: Value::Object(options.clone().into_iter().collect()), page: step_page, response: step_response };
                    let before = state.clone();
                    let mut attempt = executor.run(state.clone(), &ctx).await;
                    if attempt.is_err() {
                        let first_error = format!("{}", attempt.as_ref().err().unwrap());
                        tracing::warn!(run_id, step_id = %step_id, error = %first_error, "step failed, retrying once");
                        emit_async(events, EventKind::StepRetry { step_id: step_id.clone(), error: first_error }).await;
                        attempt = executor.run(state.clone(), &ctx).await;
                    }
                    match attempt {
                        Ok(outcome) => {
                            let new_state = outcome.state().clone();
                            let patch = diff_patch(&before, &new_state);
                            state = new_state;
                            steps[step_index].status = StepStatus::Complete;
                            steps[step_index].patch = Some(patch.clone());
                            emit_async(events, EventKind::StepComplete { step_id: step_id.clone(), patch }).await;
                            emit_step_status(events, &steps).await;
                        }
                        Err(e) => {
                            steps[step_index].status = StepStatus::Error;
                            emit_error(events, &e, &steps).await;
                            return GeneratorOutcome::Error(e);
                        }
                    }
                }
                Block::Guard { predicate, .. } => match predicate.check(&state).await {
                    Ok(true) => {
                        steps[step_index].status = StepStatus::Complete;
                        emit_async(events, EventKind::StepComplete { step_id: step_id.clone(), patch: vec![] }).await;
                        emit_step_status(events, &steps).await;
                    }
                    Ok(false) => {
                        halted = true;
                        steps[step_index].status = StepStatus::Complete;
                        emit_async(events, EventKind::StepComplete { step_id: step_id.clone(), patch: vec![] }).await;
                        emit_step_status(events, &steps).await;
                    }
                    Err(e) => {
                        steps[step_index].status = StepStatus::Error;
                        emit_error(events, &e, &steps).await;
                        return GeneratorOutcome::Error(e);
                    }
                },
                Block::Wait { action, .. } => match action.run(&state, run_id).await {
                    Ok(wait_for) => {
                        emit_async(events, EventKind::Webhook { wait_for }).await;
                        return GeneratorOutcome::Waiting {
                            resume: ResumeContext { state, step_index, webhook_response: None, agent_context: None, batch_progress: None, inner_resume_context: None, page: None },
                        };
                    }
                    Err(e) => {
                        steps[step_index].status = StepStatus::Error;
                        emit_error(events, &e, &steps).await;
                        return GeneratorOutcome::Error(e);
                    }
                },
                Block::Ui { generator: page_gen, .. } => match page_gen.generate(&state, run_id).await {
                    Ok((page, registration)) => {
                        emit_async(events, EventKind::Webhook { wait_for: vec![registration] }).await;
                        return GeneratorOutcome::Waiting {
                            resume: ResumeContext {
                                state,
                                step_index,
                                webhook_response: None,
                                agent_context: None,
                                batch_progress: None,
                                inner_resume_context: None,
                                page: Some(page),
                            },
                        };
                    }
                    Err(e) => {
                        steps[step_index].status = StepStatus::Error;
                        emit_error(events, &e, &steps).await;
                        return GeneratorOutcome::Error(e);
                    }
                },
                Block::Agent { configure, .. } => {
                    let config = configure(&state);
                    match agent::run_agent_loop(&step_id, &title, config, services.llm, mailbox, events).await {
                        Ok(outcome) => match finish_agent_step(outcome, &mut state, step_index, &step_id, events, &mut steps).await {
                            Some(result) => return result,
                            None => {}
                        },
                        Err(e) => {
                            steps[step_index].status = StepStatus::Error;
                            emit_error(events, &e, &steps).await;
                            return GeneratorOutcome::Error(e);
                        }
                    }
                }
                Block::Batch(batch) => {
                    let items = match batch.source.items(&state).await {
                        Ok(items) => items,
                        Err(e) => {
                            steps[step_index].status = StepStatus::Error;
                            emit_error(events, &e, &steps).await;
                            return GeneratorOutcome::Error(e);
                        }
                    };
                    let mut processed_count = pending_batch_progress.as_ref().map(|p| p.processed_count as usize).unwrap_or(0);
                    let mut accumulated: Vec<Value> = pending_batch_progress.take().map(|p| p.accumulated_results).unwrap_or_default();
                    let remaining = &items[processed_count.min(items.len())..];
                    for chunk in remaining.chunks(batch.chunk_size.max(1)) {
                        let mut chunk_results = Vec::with_capacity(chunk.len());
                        for item in chunk {
                            match batch.processor.process(item, &state).await {
                                Ok(result) => chunk_results.push(result),
                                Err(e) => {
                                    steps[step_index].status = StepStatus::Error;
                                    emit_error(events, &e, &steps).await;
                                    return GeneratorOutcome::Error(e);
                                }
                            }
                        }
                        processed_count += chunk.len();
                        accumulated.extend(chunk_results.iter().cloned());
                        emit_async(events, EventKind::BatchChunkComplete { processed_count: processed_count as u32, chunk_results }).await;

                        if let Some(signal) = drain_control_signals(mailbox) {
                            match signal {
                                Signal::Kill => {
                                    emit_async(events, EventKind::Cancelled).await;
                                    return GeneratorOutcome::Cancelled;
                                }
                                Signal::Pause => {
                                    return GeneratorOutcome::SilentPause;
                                }
                                _ => {}
                            }
                        }
                    }
                    let before = state.clone();
                    if let Some(obj) = state.as_object_mut() {
                        obj.insert(step_id.clone(), Value::Array(accumulated));
                    }
                    let patch = diff_patch(&before, &state);
                    steps[step_index].status = StepStatus::Complete;
                    steps[step_index].patch = Some(patch.clone());
                    emit_async(events, EventKind::StepComplete { step_id: step_id.clone(), patch }).await;
                    emit_step_status(events, &steps).await;
                }
                Block::Brain(nested) => {
                    let inner_initial = match nested.init.initial_state(&state).await {
                        Ok(v) => v,
                        Err(e) => {
                            steps[step_index].status = StepStatus::Error;
                            emit_error(events, &e, &steps).await;
                            return GeneratorOutcome::Error(e);
                        }
                    };
                    let inner_resume = pending_inner_resume.take().map(|b| *b);
                    let inner_prefix = format!("{step_id}.");
                    let outcome = run(
                        &nested.brain,
                        run_id,
                        Some(step_id.clone()),
                        &inner_prefix,
                        options,
                        inner_initial,
                        inner_resume,
                        mailbox,
                        services,
                        events,
                    )
                    .await;
                    match outcome {
                        GeneratorOutcome::Complete { state: inner_state } => match nested.reducer.reduce(&state, &inner_state).await {
                            Ok(new_state) => {
                                let before = state.clone();
                                state = new_state;
                                let patch = diff_patch(&before, &state);
                                steps[step_index].status = StepStatus::Complete;
                                steps[step_index].patch = Some(patch.clone());
                                emit_async(events, EventKind::StepComplete { step_id: step_id.clone(), patch }).await;
                                emit_step_status(events, &steps).await;
                            }
                            Err(e) => {
                                steps[step_index].status = StepStatus::Error;
                                emit_error(events, &e, &steps).await;
                                return GeneratorOutcome::Error(e);
                            }
                        },
                        GeneratorOutcome::Waiting { resume: inner_ctx } => {
                            return GeneratorOutcome::Waiting {
                                resume: ResumeContext {
                                    state,
                                    step_index,
                                    webhook_response: None,
                                    agent_context: None,
                                    batch_progress: None,
                                    inner_resume_context: Some(Box::new(inner_ctx)),
                                    page: None,
                                },
                            };
                        }
                        GeneratorOutcome::Cancelled => return GeneratorOutcome::Cancelled,
                        GeneratorOutcome::Paused => return GeneratorOutcome::Paused,
                        GeneratorOutcome::SilentPause => return GeneratorOutcome::SilentPause,
                        GeneratorOutcome::Error(e) => return GeneratorOutcome::Error(e),
                    }
                }
            }
            step_index += 1;
        }

        tracing::info!(run_id, brain = %brain.title, "brain run complete");
        emit_async(events, EventKind::Complete { state: state.clone() }).await;
        GeneratorOutcome::Complete { state }
    })
}

/// Shared tail of the agent-block dispatch: folds an [`AgentOutcome`] into
/// the running state, or short-circuits the whole run.
async fn finish_agent_step(
    outcome: AgentOutcome,
    state: &mut Value,
    step_index: usize,
    step_id: &str,
    events: &mpsc::Sender<EventKind>,
    steps: &mut [StepInfo],
) -> Option<GeneratorOutcome> {
    match outcome {
        AgentOutcome::Complete { result } => {
            let before = state.clone();
            if !state.is_object() {
                *state = Value::Object(Default::default());
            }
            if let Some(obj) = state.as_object_mut() {
                if let Some(result_obj) = result.as_object() {
                    for (k, v) in result_obj {
                        obj.insert(k.clone(), v.clone());
                    }
                } else {
                    obj.insert("result".to_string(), result);
                }
            }
            let patch = diff_patch(&before, state);
            steps[step_index].status = StepStatus::Complete;
            steps[step_index].patch = Some(patch.clone());
            emit_async(events, EventKind::StepComplete { step_id: step_id.to_string(), patch }).await;
            emit_step_status(events, steps).await;
            None
        }
        AgentOutcome::Cancelled => Some(GeneratorOutcome::Cancelled),
        AgentOutcome::Paused => Some(GeneratorOutcome::Paused),
        AgentOutcome::WaitingOnWebhook => Some(GeneratorOutcome::Waiting {
            resume: ResumeContext {
                state: state.clone(),
                step_index,
                webhook_response: None,
                agent_context: None,
                batch_progress: None,
                inner_resume_context: None,
                page: None,
            },
        }),
    }
}

async fn emit_error(events: &mpsc::Sender<EventKind>, e: &RunError, steps: &[StepInfo]) {
    tracing::warn!(error = %e, "brain run failed");
    emit_async(events, EventKind::Error { name: "RunError".to_string(), message: e.to_string(), stack: None }).await;
    emit_step_status(events, steps).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Brain, NestedBrainBlock, NestedBrainInit, NestedBrainReducer, StepContext, StepExecutor, StepOutcome};
    use crate::event::WebhookRegistration;
    use crate::llm::ScriptedLlmClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn mailbox() -> (mpsc::UnboundedSender<Signal>, SignalMailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, SignalMailbox::new(rx))
    }

    async fn drain(rx: &mut mpsc::Receiver<EventKind>) -> Vec<EventKind> {
        let mut out = Vec::new();
        while let Ok(kind) = rx.try_recv() {
            out.push(kind);
        }
        out
    }

    struct SetField(&'static str, i64);
    #[async_trait]
    impl StepExecutor for SetField {
        async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            let mut obj = state.as_object().cloned().unwrap_or_default();
            obj.insert(self.0.to_string(), serde_json::json!(self.1));
            Ok(StepOutcome::State(Value::Object(obj)))
        }
    }

    struct AddCount;
    #[async_trait]
    impl StepExecutor for AddCount {
        async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            let mut obj = state.as_object().cloned().unwrap_or_default();
            let current = obj.get("count").and_then(Value::as_i64).unwrap_or(0);
            obj.insert("count".into(), serde_json::json!(current + 1));
            Ok(StepOutcome::State(Value::Object(obj)))
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl StepExecutor for AlwaysFail {
        async fn run(&self, _state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            Err(RunError::StepFailed { step: "X".into(), message: "boom".into() })
        }
    }

    /// Fails on its first call, then succeeds — exercises the retry-once path.
    struct FailOnce(AtomicUsize);
    #[async_trait]
    impl StepExecutor for FailOnce {
        async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RunError::StepFailed { step: "Flaky".into(), message: "transient".into() });
            }
            Ok(StepOutcome::State(state))
        }
    }

    struct AlwaysHalt;
    #[async_trait]
    impl crate::block::GuardPredicate for AlwaysHalt {
        async fn check(&self, _state: &Value) -> Result<bool, RunError> {
            Ok(false)
        }
    }

    struct SendsWebhook;
    #[async_trait]
    impl crate::block::WaitAction for SendsWebhook {
        async fn run(&self, _state: &Value, _run_id: &str) -> Result<Vec<WebhookRegistration>, RunError> {
            Ok(vec![WebhookRegistration { slug: "slack".into(), identifier: "thread-1".into(), token: "tok".into() }])
        }
    }

    fn services(llm: &ScriptedLlmClient) -> GeneratorServices<'_> {
        GeneratorServices { llm }
    }

    /// **Scenario**: a two-step brain (spec.md §8 scenario 1) runs to
    /// completion, emitting START/STEP_STATUS/STEP_START/STEP_COMPLETE per
    /// step and a single trailing COMPLETE, with each step's patch reflecting
    /// only its own field.
    #[tokio::test]
    async fn simple_two_step_run_completes_with_patches() {
        let brain = Brain::new(
            "Counter",
            vec![
                Block::Step { title: "A".into(), executor: Arc::new(SetField("count", 1)) },
                Block::Step { title: "B".into(), executor: Arc::new(AddCount) },
            ],
        );
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;

        match outcome {
            GeneratorOutcome::Complete { state } => assert_eq!(state["count"], serde_json::json!(2)),
            _ => panic!("expected Complete"),
        }

        let events = drain(&mut events_rx).await;
        assert!(matches!(events.first(), Some(EventKind::Start { .. })));
        assert!(matches!(events.last(), Some(EventKind::Complete { .. })));
        let patches: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EventKind::StepComplete { patch, .. } => Some(patch.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0], vec![serde_json::json!({"op": "add", "path": "/count", "value": 1})]);
        assert_eq!(patches[1], vec![serde_json::json!({"op": "replace", "path": "/count", "value": 2})]);
    }

    /// **Scenario**: a failing step retries once (emitting STEP_RETRY) and
    /// succeeds on the second attempt rather than erroring the run.
    #[tokio::test]
    async fn step_retries_once_then_succeeds() {
        let brain = Brain::new("Flaky", vec![Block::Step { title: "Flaky".into(), executor: Arc::new(FailOnce(AtomicUsize::new(0))) }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;
        assert!(matches!(outcome, GeneratorOutcome::Complete { .. }));

        let events = drain(&mut events_rx).await;
        assert!(events.iter().any(|e| matches!(e, EventKind::StepRetry { .. })));
        assert!(events.iter().any(|e| matches!(e, EventKind::StepComplete { .. })));
    }

    /// **Scenario**: a step that fails on both attempts emits ERROR and the
    /// run ends as an error, not completion.
    #[tokio::test]
    async fn step_fails_twice_errors_the_run() {
        let brain = Brain::new("Boom", vec![Block::Step { title: "X".into(), executor: Arc::new(AlwaysFail) }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;
        assert!(matches!(outcome, GeneratorOutcome::Error(_)));

        let events = drain(&mut events_rx).await;
        assert!(events.iter().any(|e| matches!(e, EventKind::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, EventKind::Complete { .. })));
    }

    /// **Scenario**: a failing guard (spec.md §8 scenario 2) halts every
    /// subsequent block — no STEP_START for the halted tail, their status in
    /// the final STEP_STATUS snapshot is HALTED, and state is unaffected by
    /// them. The run still completes.
    #[tokio::test]
    async fn guard_halts_tail_without_starting_it() {
        let brain = Brain::new(
            "Guarded",
            vec![
                Block::Step { title: "Init".into(), executor: Arc::new(SetField("seen", 1)) },
                Block::Guard { title: "Gate".into(), predicate: Arc::new(AlwaysHalt) },
                Block::Step { title: "X".into(), executor: Arc::new(SetField("x", 99)) },
                Block::Step { title: "Y".into(), executor: Arc::new(SetField("y", 99)) },
            ],
        );
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;

        match outcome {
            GeneratorOutcome::Complete { state } => {
                assert_eq!(state["seen"], serde_json::json!(1));
                assert!(state.get("x").is_none());
                assert!(state.get("y").is_none());
            }
            _ => panic!("expected Complete"),
        }

        let events = drain(&mut events_rx).await;
        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EventKind::StepStart { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["Init".to_string(), "Gate".to_string()]);

        let last_status = events
            .iter()
            .rev()
            .find_map(|e| match e {
                EventKind::StepStatus { steps } => Some(steps.clone()),
                _ => None,
            })
            .expect("a STEP_STATUS snapshot");
        let steps: Vec<StepInfo> = serde_json::from_value(last_status).unwrap();
        assert_eq!(steps[2].status, StepStatus::Halted);
        assert_eq!(steps[3].status, StepStatus::Halted);
    }

    /// **Scenario**: a Wait block (spec.md §8 scenario 3) suspends the run
    /// with a WEBHOOK event and a resume context pointing at the same step;
    /// resuming with a matching response advances past it and completes.
    #[tokio::test]
    async fn wait_block_suspends_then_resumes_past_itself() {
        let brain = Brain::new(
            "Waits",
            vec![
                Block::Step { title: "Init".into(), executor: Arc::new(SetField("init", 1)) },
                Block::Wait { title: "Wait".into(), action: Arc::new(SendsWebhook) },
                Block::Step { title: "Process".into(), executor: Arc::new(AddCount) },
            ],
        );
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;

        let resume = match outcome {
            GeneratorOutcome::Waiting { resume } => resume,
            _ => panic!("expected Waiting"),
        };
        assert_eq!(resume.step_index, 1);
        let events = drain(&mut events_rx).await;
        assert!(matches!(events.last(), Some(EventKind::Webhook { .. })));

        let (_tx2, mut mb2) = mailbox();
        let (events_tx2, mut events_rx2) = mpsc::channel(64);
        let mut resumed = resume;
        resumed.webhook_response = Some(WebhookResponsePayload { slug: "slack".into(), identifier: "thread-1".into(), response: serde_json::json!({"msg": "ok"}) });
        let outcome2 = run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Null, Some(resumed), &mut mb2, &svc, &events_tx2).await;
        match outcome2 {
            GeneratorOutcome::Complete { state } => assert_eq!(state["count"], serde_json::json!(1)),
            _ => panic!("expected Complete"),
        }
        let events2 = drain(&mut events_rx2).await;
        assert!(matches!(events2.first(), Some(EventKind::WebhookResponse { .. })));
        let started: Vec<_> = events2
            .iter()
            .filter_map(|e| match e {
                EventKind::StepStart { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["Process".to_string()]);
    }

    struct StaticInit;
    #[async_trait]
    impl NestedBrainInit for StaticInit {
        async fn initial_state(&self, _parent_state: &Value) -> Result<Value, RunError> {
            Ok(serde_json::json!({"inner_count": 0}))
        }
    }

    struct MergeReducer;
    #[async_trait]
    impl NestedBrainReducer for MergeReducer {
        async fn reduce(&self, parent_state: &Value, inner_state: &Value) -> Result<Value, RunError> {
            let mut obj = parent_state.as_object().cloned().unwrap_or_default();
            obj.insert("inner_count".into(), inner_state["inner_count"].clone());
            Ok(Value::Object(obj))
        }
    }

    /// **Scenario**: a nested Brain block (spec.md §8 scenario 4) runs its
    /// inner brain to its own COMPLETE, which never appears as the *outer*
    /// run's terminal outcome — only the outer's own trailing COMPLETE does,
    /// and the reducer folds the inner result back into parent state.
    #[tokio::test]
    async fn nested_brain_complete_does_not_terminate_outer() {
        let inner = Brain::new("Inner", vec![Block::Step { title: "Bump".into(), executor: Arc::new(AddCount2("inner_count")) }]);
        let outer = Brain::new(
            "Outer",
            vec![Block::Brain(NestedBrainBlock {
                title: "RunInner".into(),
                brain: Arc::new(inner),
                init: Arc::new(StaticInit),
                reducer: Arc::new(MergeReducer),
            })],
        );
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&outer, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;

        match outcome {
            GeneratorOutcome::Complete { state } => assert_eq!(state["inner_count"], serde_json::json!(1)),
            _ => panic!("expected Complete"),
        }
        let events = drain(&mut events_rx).await;
        let complete_count = events.iter().filter(|e| matches!(e, EventKind::Complete { .. })).count();
        assert_eq!(complete_count, 2, "inner COMPLETE plus outer COMPLETE, but only one terminates the run");
    }

    struct AddCount2(&'static str);
    #[async_trait]
    impl StepExecutor for AddCount2 {
        async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            let mut obj = state.as_object().cloned().unwrap_or_default();
            let current = obj.get(self.0).and_then(Value::as_i64).unwrap_or(0);
            obj.insert(self.0.to_string(), serde_json::json!(current + 1));
            Ok(StepOutcome::State(Value::Object(obj)))
        }
    }

    struct CountingItems(Mutex<usize>);
    #[async_trait]
    impl crate::block::BatchItemSource for CountingItems {
        async fn items(&self, _state: &Value) -> Result<Vec<Value>, RunError> {
            Ok((0..5).map(|i| serde_json::json!(i)).collect())
        }
    }

    struct EchoProcessor;
    #[async_trait]
    impl crate::block::BatchItemProcessor for EchoProcessor {
        async fn process(&self, item: &Value, _state: &Value) -> Result<Value, RunError> {
            Ok(item.clone())
        }
    }

    /// **Scenario**: a PAUSE signal arriving between batch chunks ends the
    /// run silently (no PAUSED event) with a resumable `SilentPause`
    /// outcome.
    #[tokio::test]
    async fn batch_pause_between_chunks_is_silent() {
        let brain = Brain::new(
            "Batching",
            vec![Block::Batch(crate::block::BatchBlock {
                title: "Items".into(),
                source: Arc::new(CountingItems(Mutex::new(0))),
                processor: Arc::new(EchoProcessor),
                chunk_size: 2,
            })],
        );
        let (tx, mut mb) = mailbox();
        // Queued before the run starts; drained between the first and second chunk.
        tx.send(Signal::Pause).unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;
        assert!(matches!(outcome, GeneratorOutcome::SilentPause));

        let events = drain(&mut events_rx).await;
        assert!(!events.iter().any(|e| matches!(e, EventKind::Paused)));
        let chunk_events: Vec<_> = events.iter().filter(|e| matches!(e, EventKind::BatchChunkComplete { .. })).collect();
        assert_eq!(chunk_events.len(), 1, "only the first chunk should have completed before the pause was observed");
    }

    /// **Scenario**: a KILL signal queued before the run starts is honored at
    /// the first suspension point, emitting CANCELLED with no STEP_START.
    #[tokio::test]
    async fn kill_before_first_step_cancels_immediately() {
        let brain = Brain::new("Anything", vec![Block::Step { title: "A".into(), executor: Arc::new(SetField("a", 1)) }]);
        let (tx, mut mb) = mailbox();
        tx.send(Signal::Kill).unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let llm = ScriptedLlmClient::new(vec![]);
        let svc = services(&llm);
        let outcome =
            run(&brain, "run-1", None, "", &BTreeMap::new(), Value::Object(Default::default()), None, &mut mb, &svc, &events_tx).await;
        assert!(matches!(outcome, GeneratorOutcome::Cancelled));

        let events = drain(&mut events_rx).await;
        assert!(matches!(events.last(), Some(EventKind::Cancelled)));
        assert!(!events.iter().any(|e| matches!(e, EventKind::StepStart { .. })));
    }

    /// **Scenario**: `diff_patch` emits add/replace/remove ops for top-level
    /// keys only, matching before/after exactly when nothing changed.
    #[test]
    fn diff_patch_covers_add_replace_remove() {
        let before = serde_json::json!({"a": 1, "b": 2});
        let after = serde_json::json!({"a": 1, "b": 3, "c": 4});
        let ops = diff_patch(&before, &after);
        assert_eq!(ops.len(), 2);
        assert!(ops.contains(&serde_json::json!({"op": "replace", "path": "/b", "value": 3})));
        assert!(ops.contains(&serde_json::json!({"op": "add", "path": "/c", "value": 4})));

        assert!(diff_patch(&before, &before).is_empty());

        let removed = serde_json::json!({"a": 1});
        let ops2 = diff_patch(&before, &removed);
        assert_eq!(ops2, vec![serde_json::json!({"op": "remove", "path": "/b"})]);
    }
}
