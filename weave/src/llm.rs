//! The minimal LLM provider boundary.
//!
//! Grounded in `loom::LlmClient`, trimmed to exactly what the agent loop
//! needs: one request/response round trip that returns the provider's own
//! updated message list, so provider-specific metadata (reasoning
//! signatures, citations) rides along untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSpec};

/// How the model should be nudged toward (or away from) tool use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

/// One call to the provider: system prompt plus the full running message
/// history.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

/// The provider's reply. `messages` is the *entire* updated running history
///, not just the delta.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub messages: Vec<Message>,
    pub tokens_used: u32,
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, AgentError>;
}

/// A scripted client for tests and demos: replays a fixed sequence of
/// responses, one per call, cycling the last if exhausted. Grounded in
/// `tests/mock_llm.rs`'s scripted-response pattern.
pub struct ScriptedLlmClient {
    responses: std::sync::Mutex<Vec<LlmResponse>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, AgentError> {
        let mut guard = self.responses.lock().unwrap();
        if guard.is_empty() {
            return Err(AgentError::Provider("scripted client exhausted".into()));
        }
        if guard.len() == 1 {
            Ok(guard[0].clone())
        } else {
            Ok(guard.remove(0))
        }
    }
}
