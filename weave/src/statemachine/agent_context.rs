//! Runtime state for a paused agent.

use serde::{Deserialize, Serialize};

use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub step_id: String,
    pub title: String,
    pub prompt: String,
    pub system: Option<String>,
    pub response_messages: Vec<Message>,
    pub pending_tool_call_id: Option<String>,
    pub pending_tool_name: Option<String>,
}

impl AgentContext {
    pub fn new(step_id: impl Into<String>, title: impl Into<String>, prompt: impl Into<String>, system: Option<String>) -> Self {
        Self {
            step_id: step_id.into(),
            title: title.into(),
            prompt: prompt.into(),
            system,
            response_messages: Vec::new(),
            pending_tool_call_id: None,
            pending_tool_name: None,
        }
    }

    /// Non-null iff execution is inside or paused from an agent loop, i.e.
    /// there's a pending tool call awaiting a webhook response.
    pub fn has_pending_webhook(&self) -> bool {
        self.pending_tool_call_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a fresh agent context has no pending webhook.
    #[test]
    fn fresh_context_has_no_pending_webhook() {
        let ctx = AgentContext::new("step-1", "Ask", "do the thing", None);
        assert!(!ctx.has_pending_webhook());
    }

    /// **Scenario**: setting a pending tool call id marks the context as webhook-pending.
    #[test]
    fn pending_tool_call_marks_webhook_pending() {
        let mut ctx = AgentContext::new("step-1", "Ask", "do the thing", None);
        ctx.pending_tool_call_id = Some("call-1".into());
        ctx.pending_tool_name = Some("escalate".into());
        assert!(ctx.has_pending_webhook());
    }
}
