//! Block kinds and the `Brain` they make up.
//!
//! Grounded in `loom::graph::Node<S>` (async-trait, `Arc`-held, one method
//! per kind), but a brain is a straight-line ordered list rather than a
//! general graph — it has no conditional edges, only a `Guard` block that
//! halts the remaining tail.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::agent::AgentConfig;
use crate::error::RunError;
use crate::event::WebhookRegistration;

/// Ambient services a step/batch/guard/wait/ui executor may read. Kept as
/// an explicit record rather than a growing positional-argument list —
/// callers construct the subset they need and leave the rest default.
#[derive(Clone, Default)]
pub struct StepContext {
    pub options: Value,
    pub page: Option<Value>,
    /// The webhook payload that resumed the run, if this step is the first
    /// one dispatched after a Wait/UI block's webhook resolved.
    pub response: Option<Value>,
}

/// A plain step's result.
pub enum StepOutcome {
    State(Value),
    WithPrompt { state: Value, prompt_response: Value },
}

impl StepOutcome {
    pub fn state(&self) -> &Value {
        match self {
            StepOutcome::State(s) => s,
            StepOutcome::WithPrompt { state, .. } => state,
        }
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run(&self, state: Value, ctx: &StepContext) -> Result<StepOutcome, RunError>;
}

/// Blanket impl so ordinary async closures can be used directly, matching
/// the ergonomics of `loom::graph::Node`'s closure helpers.
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> StepExecutor for FnStep<F>
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<StepOutcome, RunError>> + Send,
{
    async fn run(&self, state: Value, ctx: &StepContext) -> Result<StepOutcome, RunError> {
        (self.0)(state, ctx.clone()).await
    }
}

/// Produces the list of items a `Batch` block iterates, one `generateObject`
/// call per item, `chunkSize` at a time.
#[async_trait]
pub trait BatchItemSource: Send + Sync {
    async fn items(&self, state: &Value) -> Result<Vec<Value>, RunError>;
}

#[async_trait]
pub trait BatchItemProcessor: Send + Sync {
    async fn process(&self, item: &Value, state: &Value) -> Result<Value, RunError>;
}

pub struct BatchBlock {
    pub title: String,
    pub source: Arc<dyn BatchItemSource>,
    pub processor: Arc<dyn BatchItemProcessor>,
    pub chunk_size: usize,
}

/// Predicate over state; `false` halts all subsequent blocks as HALTED.
#[async_trait]
pub trait GuardPredicate: Send + Sync {
    async fn check(&self, state: &Value) -> Result<bool, RunError>;
}

/// A side-effecting action (e.g. send a notification) that returns the
/// webhook registrations the run should then wait on.
#[async_trait]
pub trait WaitAction: Send + Sync {
    async fn run(&self, state: &Value, run_id: &str) -> Result<Vec<WebhookRegistration>, RunError>;
}

/// Generates a page for the next step to consume, producing a built-in
/// `ui-form` webhook registration.
#[async_trait]
pub trait UiPageGenerator: Send + Sync {
    async fn generate(&self, state: &Value, run_id: &str) -> Result<(Value, WebhookRegistration), RunError>;
}

/// `(parentState, services) -> initialState` for a nested brain, and the
/// matching `(parentState, innerState, services) -> newParentState` reducer
/// that folds the nested run's outcome back in.
#[async_trait]
pub trait NestedBrainInit: Send + Sync {
    async fn initial_state(&self, parent_state: &Value) -> Result<Value, RunError>;
}

#[async_trait]
pub trait NestedBrainReducer: Send + Sync {
    async fn reduce(&self, parent_state: &Value, inner_state: &Value) -> Result<Value, RunError>;
}

pub struct NestedBrainBlock {
    pub title: String,
    pub brain: Arc<Brain>,
    pub init: Arc<dyn NestedBrainInit>,
    pub reducer: Arc<dyn NestedBrainReducer>,
}

/// Builds an [`AgentConfig`] from the current state.
pub type AgentConfigurator = Arc<dyn Fn(&Value) -> AgentConfig + Send + Sync>;

/// One entry in a brain's ordered block list.
pub enum Block {
    Step { title: String, executor: Arc<dyn StepExecutor> },
    Batch(BatchBlock),
    Agent { title: String, configure: AgentConfigurator },
    Brain(NestedBrainBlock),
    Guard { title: String, predicate: Arc<dyn GuardPredicate> },
    Wait { title: String, action: Arc<dyn WaitAction> },
    Ui { title: String, generator: Arc<dyn UiPageGenerator> },
}

impl Block {
    pub fn title(&self) -> &str {
        match self {
            Block::Step { title, .. } => title,
            Block::Batch(b) => &b.title,
            Block::Agent { title, .. } => title,
            Block::Brain(b) => &b.title,
            Block::Guard { title, .. } => title,
            Block::Wait { title, .. } => title,
            Block::Ui { title, .. } => title,
        }
    }
}

/// An ordered list of blocks that, when executed, produces an event
/// sequence and a final JSON state (GLOSSARY "Brain").
pub struct Brain {
    pub title: String,
    pub description: Option<String>,
    pub blocks: Vec<Block>,
}

impl Brain {
    pub fn new(title: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self { title: title.into(), description: None, blocks }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
