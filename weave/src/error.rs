//! Typed error taxonomy for every fallible boundary in the runtime.

use thiserror::Error;

/// Errors from an [`crate::log::EventLog`] implementation.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("run {0} is terminal, no further events may be appended")]
    Terminal(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("run {0} not found")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while executing the stream generator for one run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("event log error: {0}")]
    Log(#[from] LogError),
    #[error("agent loop error: {0}")]
    Agent(#[from] AgentError),
    #[error("brain {0:?} has no block at index {1}")]
    BlockIndexOutOfRange(String, usize),
    #[error("step {step} failed: {message}")]
    StepFailed { step: String, message: String },
    #[error("unknown block kind referenced during resume: {0}")]
    UnknownResumeTarget(String),
}

/// Errors from the tool-use agent loop (§4.3).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm provider call failed: {0}")]
    Provider(String),
    #[error("tool {0:?} not found in registry")]
    UnknownTool(String),
    #[error("tool {0:?} execution failed: {1}")]
    ToolExecution(String, String),
}

/// Errors surfaced by the run actor (§4.5) and dispatcher (§4.6).
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("run {0} is already terminal")]
    AlreadyTerminal(String),
    #[error("run {0} already has a live executor")]
    ExecutorAlreadyRunning(String),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Webhook delivery is not an error; this type exists only to let callers
/// pattern-match the two outcomes without reaching for a bare bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Resumed,
    NoMatch,
}

/// Configuration-taxonomy errors (§7): surfaced as 4xx by the dispatcher,
/// never appended to any event log.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no brain matches identifier {0:?}")]
    NotFound(String),
    #[error("identifier {0:?} matches multiple brains")]
    Ambiguous(String, Vec<String>),
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error(transparent)]
    Actor(#[from] ActorError),
}
