//! Event-sourced brain execution runtime: event log, state machine, tool-use
//! agent loop, stream generator, run actor.
//!
//! Builder DSL, CLI/TUI, wire deploy tooling, LLM provider HTTP adapters,
//! blob storage, page rendering, secrets, and end-user auth are external
//! collaborators with contracts only — this crate models those
//! contracts as traits ([`llm::LlmClient`], [`block::StepExecutor`], etc.)
//! and ships mocks for tests/demos, not real adapters.

pub mod actor;
pub mod agent;
pub mod block;
pub mod builder;
pub mod error;
pub mod event;
pub mod generator;
pub mod llm;
pub mod log;
pub mod message;
pub mod registry;
pub mod run;
pub mod signal;
pub mod statemachine;
pub mod tool;

pub use actor::{reconstruct_resume_context, RunActor, RunActorHandle};
pub use agent::{AgentConfig, AgentOutcome};
pub use block::{Block, Brain, StepContext, StepExecutor, StepOutcome};
pub use builder::BrainBuilder;
pub use error::{ActorError, AgentError, DispatchError, LogError, RunError, WebhookOutcome};
pub use event::{Event, EventKind, WebhookRegistration};
pub use generator::{GeneratorOutcome, GeneratorServices, ResumeContext, WebhookResponsePayload};
pub use llm::{LlmClient, LlmRequest, LlmResponse, ToolChoice};
pub use log::{EventLog, MemoryEventLog, SqliteEventLog};
pub use message::{Message, Role};
pub use registry::{BrainRegistry, MatchOutcome};
pub use run::{Run, RunStatus};
pub use signal::{Signal, SignalMailbox};
pub use statemachine::{project, MachineState, Projection};
pub use tool::{OutputSchema, ToolCall, ToolDef, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};
