//! The pure projection `events → (state, context)`.
//!
//! Grounded in `loom::graph::runtime`'s reducer-over-state pattern, but
//! specialized to a fixed transition table rather than a general graph
//! runtime — the labelled transition system here has a closed state set
//! and no user-defined routing.

pub mod agent_context;
pub mod tree;

use serde_json::Value;

use crate::event::{Event, EventKind, WebhookRegistration};
use crate::run::RunStatus;
use agent_context::AgentContext;
use tree::{BrainNode, StepInfo, StepStatus};

/// The labelled transition system's state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Running,
    AgentLoop,
    Paused,
    Waiting,
    Complete,
    Error,
    Cancelled,
}

impl MachineState {
    /// Projecting status: `agentLoop`
    /// surfaces as `RUNNING`; consumers never see the agent sub-state.
    pub fn to_run_status(self) -> RunStatus {
        match self {
            MachineState::Idle => RunStatus::Pending,
            MachineState::Running | MachineState::AgentLoop => RunStatus::Running,
            MachineState::Paused => RunStatus::Paused,
            MachineState::Waiting => RunStatus::Waiting,
            MachineState::Complete => RunStatus::Complete,
            MachineState::Error => RunStatus::Error,
            MachineState::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// The full `(state, context)` tuple a projection carries.
#[derive(Debug, Clone)]
pub struct Projection {
    pub machine_state: MachineState,
    pub root_brain: Option<BrainNode>,
    pub depth: u32,
    pub current_step_id: Option<String>,
    pub current_title: Option<String>,
    pub current_state: Value,
    pub pending_webhooks: Vec<WebhookRegistration>,
    pub agent_context: Option<AgentContext>,
    pub total_tokens: u32,
    pub top_level_step_count: u32,
    pub terminal_error: Option<Value>,
    pub batch_progress: Option<BatchProgress>,
}

/// Accumulated `BATCH_CHUNK_COMPLETE` progress for the step currently being
/// resumed, if it is a `Batch` block.
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    pub processed_count: u32,
    pub accumulated_results: Vec<Value>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            machine_state: MachineState::Idle,
            root_brain: None,
            depth: 0,
            current_step_id: None,
            current_title: None,
            current_state: Value::Object(Default::default()),
            pending_webhooks: Vec::new(),
            agent_context: None,
            total_tokens: 0,
            top_level_step_count: 0,
            terminal_error: None,
            batch_progress: None,
        }
    }
}

impl Projection {
    pub fn status(&self) -> RunStatus {
        self.machine_state.to_run_status()
    }
}

/// Applies a JSON-patch (the subset used by the generator: `add`/`replace`
/// at a top-level pointer) onto `target`, folding step patches into state.
pub(crate) fn apply_patch(target: &mut Value, patch: &[Value]) {
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    let obj = target.as_object_mut().expect("coerced above");
    for op in patch {
        let Some(path) = op.get("path").and_then(Value::as_str) else { continue };
        let key = path.trim_start_matches('/');
        if key.is_empty() {
            continue;
        }
        match op.get("op").and_then(Value::as_str) {
            Some("remove") => {
                obj.remove(key);
            }
            _ => {
                if let Some(value) = op.get("value") {
                    obj.insert(key.to_string(), value.clone());
                }
            }
        }
    }
}

/// Folds one event onto a running projection. Pure: same `(projection,
/// event)` always yields the same next projection.
fn reduce_one(mut p: Projection, ev: &Event) -> Projection {
    match &ev.kind {
        EventKind::Start { title, parent_step_id, .. } => {
            let node = BrainNode::new(ev.run_id.clone(), title.clone(), parent_step_id.clone());
            match &mut p.root_brain {
                None => {
                    p.root_brain = Some(node);
                    p.depth = 1;
                }
                Some(root) => {
                    root.deepest_mut().inner_brain = Some(Box::new(node));
                    p.depth = root.depth();
                }
            }
            p.machine_state = MachineState::Running;
        }
        EventKind::Resumed => {
            p.machine_state = if p.agent_context.is_some() { MachineState::AgentLoop } else { MachineState::Running };
        }
        EventKind::Restart { title, parent_step_id } => {
            match &mut p.root_brain {
                None => {
                    p.root_brain = Some(BrainNode::new(ev.run_id.clone(), title.clone(), parent_step_id.clone()));
                    p.depth = 1;
                }
                Some(root) => {
                    let deepest_title_matches = root.deepest().title == *title;
                    if deepest_title_matches {
                        // Replace: same brain resuming, preserve accumulated steps? spec
                        // says "replace that node (resume of same brain)" — the node's
                        // identity is replaced but its parent linkage is kept.
                        let parent_step_id = root.deepest().parent_step_id.clone();
                        let replacement = BrainNode::new(ev.run_id.clone(), title.clone(), parent_step_id);
                        set_deepest(root, replacement);
                    } else {
                        root.deepest_mut().inner_brain =
                            Some(Box::new(BrainNode::new(ev.run_id.clone(), title.clone(), parent_step_id.clone())));
                    }
                    p.depth = root.depth();
                }
            }
            p.machine_state = if p.agent_context.is_some() { MachineState::AgentLoop } else { MachineState::Running };
        }
        EventKind::Complete { state } => {
            if p.depth <= 1 {
                p.current_state = state.clone();
                p.machine_state = MachineState::Complete;
            } else if let Some(root) = &mut p.root_brain {
                let deepest = root.deepest().clone();
                pop_deepest_with_splice(root, &deepest);
                p.depth = root.depth();
                p.machine_state = MachineState::Running;
            }
        }
        EventKind::Error { name, message, .. } => {
            if p.depth <= 1 {
                p.machine_state = MachineState::Error;
                p.terminal_error = Some(serde_json::json!({"name": name, "message": message}));
            } else {
                p.machine_state = MachineState::Running;
            }
        }
        EventKind::Cancelled => {
            p.machine_state = MachineState::Cancelled;
            p.pending_webhooks.clear();
        }
        EventKind::Paused => {
            p.machine_state = MachineState::Paused;
        }
        EventKind::StepStart { step_id, title } => {
            p.current_step_id = Some(step_id.clone());
            p.current_title = Some(title.clone());
            if let Some(root) = &mut p.root_brain {
                let deepest = root.deepest_mut();
                if let Some(step) = deepest.steps.iter_mut().find(|s| &s.id == step_id) {
                    step.status = StepStatus::Running;
                } else {
                    let mut step = StepInfo::pending(step_id.clone(), title.clone());
                    step.status = StepStatus::Running;
                    deepest.steps.push(step);
                    if deepest.parent_step_id.is_none() {
                        p.top_level_step_count += 1;
                    }
                }
            }
        }
        EventKind::StepComplete { step_id, patch } => {
            if let Some(root) = &mut p.root_brain {
                let is_top_level = root.deepest().parent_step_id.is_none() && p.depth == 1;
                let deepest = root.deepest_mut();
                if let Some(step) = deepest.steps.iter_mut().find(|s| &s.id == step_id) {
                    step.status = StepStatus::Complete;
                    step.patch = Some(patch.clone());
                }
                if is_top_level {
                    apply_patch(&mut p.current_state, patch);
                }
                p.batch_progress = None;
            }
        }
        EventKind::StepStatus { .. } => {
            // Full snapshot: already reconstructed incrementally via StepStart/
            // StepComplete; StepStatus is a UI convenience, not a state source.
        }
        EventKind::StepRetry { .. } => {}
        EventKind::Webhook { wait_for } => {
            p.pending_webhooks = wait_for.clone();
            p.machine_state = MachineState::Waiting;
        }
        EventKind::WebhookResponse { .. } => {
            p.pending_webhooks.clear();
            p.machine_state = if p.agent_context.is_some() { MachineState::AgentLoop } else { MachineState::Running };
        }
        EventKind::AgentStart { step_id, prompt, system } => {
            p.agent_context = Some(AgentContext::new(
                step_id.clone(),
                p.current_title.clone().unwrap_or_default(),
                prompt.clone(),
                system.clone(),
            ));
            p.machine_state = MachineState::AgentLoop;
        }
        EventKind::AgentIteration { tokens_this_iteration, .. } => {
            p.total_tokens += tokens_this_iteration;
        }
        EventKind::AgentRawResponseMessage { message } => {
            if let Some(ctx) = &mut p.agent_context {
                ctx.response_messages.push(message.clone());
            }
        }
        EventKind::AgentToolCall { .. } => {}
        EventKind::AgentToolResult { .. } => {
            if let Some(ctx) = &mut p.agent_context {
                ctx.pending_tool_call_id = None;
                ctx.pending_tool_name = None;
            }
        }
        EventKind::AgentAssistantMessage { .. } => {}
        EventKind::AgentUserMessage { .. } => {}
        EventKind::AgentWebhook { id, tool_name, .. } => {
            if let Some(ctx) = &mut p.agent_context {
                ctx.pending_tool_call_id = Some(id.clone());
                ctx.pending_tool_name = Some(tool_name.clone());
            }
        }
        EventKind::AgentComplete { .. } => {
            p.agent_context = None;
            p.machine_state = MachineState::Running;
        }
        EventKind::AgentTokenLimit { .. } | EventKind::AgentIterationLimit { .. } => {
            p.agent_context = None;
            p.machine_state = MachineState::Running;
        }
        EventKind::BatchChunkComplete { processed_count, chunk_results } => {
            let progress = p.batch_progress.get_or_insert_with(BatchProgress::default);
            progress.processed_count = *processed_count;
            progress.accumulated_results.extend(chunk_results.iter().cloned());
        }
    }
    p
}

fn set_deepest(node: &mut BrainNode, replacement: BrainNode) {
    match &mut node.inner_brain {
        Some(inner) if inner.inner_brain.is_some() => set_deepest(inner, replacement),
        Some(_) => {
            node.inner_brain = Some(Box::new(replacement));
        }
        None => {
            *node = replacement;
        }
    }
}

/// Splices `completed`'s steps onto the parent step, then removes the node
/// so the next-deepest becomes current.
fn pop_deepest_with_splice(node: &mut BrainNode, completed: &BrainNode) {
    match &mut node.inner_brain {
        Some(inner) if inner.inner_brain.is_some() => pop_deepest_with_splice(inner, completed),
        Some(_) => {
            node.splice_completed_inner(completed);
            node.inner_brain = None;
        }
        None => {}
    }
}

/// Projects a full event log from scratch. Concatenating an in-flight prefix yields a
/// prefix of the final projection.
pub fn project(events: &[Event]) -> Projection {
    events.iter().fold(Projection::default(), reduce_one)
}
