//! The atomic unit of the runtime: an immutable, totally-ordered [`Event`].
//!
//! Grounded in `stream-event::ProtocolEvent`'s `#[serde(tag = "type")]` shape,
//! but with a closed event-kind list suited to a block-based runtime rather
//! than a node-enter/node-exit/messages protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::message::Message;

/// JSON-patch operations, just enough of RFC 6902 for step deltas.
pub type JsonPatch = Vec<Value>;

/// A single webhook registration a block is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub slug: String,
    pub identifier: String,
    pub token: String,
}

/// The closed set of event kinds a run can emit. `#[serde(tag = "type",
/// rename_all = "SCREAMING_SNAKE_CASE")]` gives each event its wire-visible
/// discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // Lifecycle
    Start { options: Value, title: String, parent_step_id: Option<String> },
    Resumed,
    Complete { state: Value },
    Error { name: String, message: String, stack: Option<String> },
    Cancelled,
    Paused,
    Restart { title: String, parent_step_id: Option<String> },

    // Step
    StepStart { step_id: String, title: String },
    StepComplete { step_id: String, patch: JsonPatch },
    StepStatus { steps: Value },
    StepRetry { step_id: String, error: String },

    // Webhook
    Webhook { wait_for: Vec<WebhookRegistration> },
    WebhookResponse { slug: String, identifier: String, response: Value },

    // Agent
    AgentStart { step_id: String, prompt: String, system: Option<String> },
    AgentIteration { iteration: u32, tokens_this_iteration: u32, total_tokens: u32 },
    AgentRawResponseMessage { message: Message },
    AgentToolCall { id: String, name: String, arguments: Value },
    AgentToolResult { id: String, result: Value },
    AgentAssistantMessage { content: String },
    AgentUserMessage { content: String },
    AgentWebhook { id: String, tool_name: String, wait_for: Vec<WebhookRegistration> },
    AgentComplete { result: Value },
    AgentTokenLimit { total_tokens: u32 },
    AgentIterationLimit { iteration: u32 },

    // Batch
    BatchChunkComplete { processed_count: u32, chunk_results: Vec<Value> },
}

impl EventKind {
    /// The wire tag, matching the `#[serde(tag = "type")]` discriminant.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::Start { .. } => "START",
            EventKind::Resumed => "RESUMED",
            EventKind::Complete { .. } => "COMPLETE",
            EventKind::Error { .. } => "ERROR",
            EventKind::Cancelled => "CANCELLED",
            EventKind::Paused => "PAUSED",
            EventKind::Restart { .. } => "RESTART",
            EventKind::StepStart { .. } => "STEP_START",
            EventKind::StepComplete { .. } => "STEP_COMPLETE",
            EventKind::StepStatus { .. } => "STEP_STATUS",
            EventKind::StepRetry { .. } => "STEP_RETRY",
            EventKind::Webhook { .. } => "WEBHOOK",
            EventKind::WebhookResponse { .. } => "WEBHOOK_RESPONSE",
            EventKind::AgentStart { .. } => "AGENT_START",
            EventKind::AgentIteration { .. } => "AGENT_ITERATION",
            EventKind::AgentRawResponseMessage { .. } => "AGENT_RAW_RESPONSE_MESSAGE",
            EventKind::AgentToolCall { .. } => "AGENT_TOOL_CALL",
            EventKind::AgentToolResult { .. } => "AGENT_TOOL_RESULT",
            EventKind::AgentAssistantMessage { .. } => "AGENT_ASSISTANT_MESSAGE",
            EventKind::AgentUserMessage { .. } => "AGENT_USER_MESSAGE",
            EventKind::AgentWebhook { .. } => "AGENT_WEBHOOK",
            EventKind::AgentComplete { .. } => "AGENT_COMPLETE",
            EventKind::AgentTokenLimit { .. } => "AGENT_TOKEN_LIMIT",
            EventKind::AgentIterationLimit { .. } => "AGENT_ITERATION_LIMIT",
            EventKind::BatchChunkComplete { .. } => "BATCH_CHUNK_COMPLETE",
        }
    }

    /// Terminal events end a run: no event may follow one of these for the
    /// affected brain depth.
    pub fn is_root_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Complete { .. } | EventKind::Error { .. } | EventKind::Cancelled
        )
    }
}

/// An immutable, appended record. `options` is the immutable option map
/// supplied at run start, carried on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub options: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(run_id: impl Into<String>, seq: u64, kind: EventKind, options: BTreeMap<String, Value>) -> Self {
        Self { run_id: run_id.into(), seq, kind, options }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: each event kind reports its exact SCREAMING_SNAKE tag.
    #[test]
    fn tag_matches_screaming_snake_case() {
        assert_eq!(EventKind::Start { options: Value::Null, title: "T".into(), parent_step_id: None }.tag(), "START");
        assert_eq!(EventKind::Webhook { wait_for: vec![] }.tag(), "WEBHOOK");
        assert_eq!(
            EventKind::AgentToolResult { id: "c".into(), result: Value::Null }.tag(),
            "AGENT_TOOL_RESULT"
        );
        assert_eq!(EventKind::BatchChunkComplete { processed_count: 0, chunk_results: vec![] }.tag(), "BATCH_CHUNK_COMPLETE");
    }

    /// **Scenario**: COMPLETE/ERROR/CANCELLED are root-terminal; RESUMED/PAUSED are not.
    #[test]
    fn root_terminal_classification() {
        assert!(EventKind::Complete { state: Value::Null }.is_root_terminal());
        assert!(EventKind::Error { name: "x".into(), message: "y".into(), stack: None }.is_root_terminal());
        assert!(EventKind::Cancelled.is_root_terminal());
        assert!(!EventKind::Paused.is_root_terminal());
        assert!(!EventKind::Resumed.is_root_terminal());
    }

    /// **Scenario**: an `Event` round-trips through JSON with its flattened kind.
    #[test]
    fn event_serializes_flattened_kind() {
        let ev = Event::new("run-1", 1, EventKind::Start { options: Value::Null, title: "T".into(), parent_step_id: None }, BTreeMap::new());
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "START");
        assert_eq!(v["run_id"], "run-1");
        assert_eq!(v["seq"], 1);
    }
}
