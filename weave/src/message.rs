//! Provider-native message modeling.
//!
//! The runtime never interprets `provider_metadata` — it forwards it
//! verbatim so reasoning signatures, citations, or other provider-specific
//! fields survive a pause/resume round trip unscathed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single provider-native message. Building `createToolResultMessage` is a
/// capability of the provider adapter (out of scope here), not the core —
/// `Message::tool_result` below is the minimal constructor the agent loop
/// itself needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
}

impl Message {
    pub fn user(content: impl Into<Value>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None, tool_name: None, provider_metadata: None }
    }

    pub fn assistant(content: impl Into<Value>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None, tool_name: None, provider_metadata: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            provider_metadata: None,
        }
    }

    pub fn with_provider_metadata(mut self, metadata: Value) -> Self {
        self.provider_metadata = Some(metadata);
        self
    }
}
