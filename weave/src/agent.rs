//! The tool-use agent loop.
//!
//! Grounded in `loom::agent::react::runner::runner::ReactRunner`'s
//! think→act→observe cycle, collapsed from a compiled node graph into a
//! direct loop: this agent has no conditional routing beyond "terminal tool
//! found" and "webhook pending", which a graph compiler would be overkill
//! for.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{AgentError, RunError};
use crate::event::EventKind;
use crate::llm::{LlmClient, LlmRequest, ToolChoice};
use crate::message::Message;
use crate::signal::{Signal, SignalMailbox};
use crate::statemachine::agent_context::AgentContext;
use crate::tool::{ToolOutcome, ToolRegistry, DONE_TOOL_NAME};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a headless agent embedded in an automated workflow. \
You have no terminal or chat surface visible to a human: you must communicate every result and \
every decision exclusively by calling the tools you are given. Call the `done` tool when finished.";

const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// What a brain's agent-step configurator returns.
pub struct AgentConfig {
    pub prompt: String,
    pub system: Option<String>,
    pub tools: ToolRegistry,
    pub tool_choice: ToolChoice,
    pub max_iterations: u32,
    pub max_tokens: Option<u32>,
}

impl AgentConfig {
    pub fn new(prompt: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            tools,
            tool_choice: ToolChoice::Auto,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: None,
        }
    }
}

/// How the loop ended. The stream generator reacts differently to each:
/// only `Complete` lets dispatch continue with `STEP_COMPLETE`.
pub enum AgentOutcome {
    Complete { result: Value },
    Cancelled,
    Paused,
    WaitingOnWebhook,
}

/// Runs one agent step from scratch.
pub async fn run_agent_loop(
    step_id: &str,
    title: &str,
    config: AgentConfig,
    llm: &dyn LlmClient,
    mailbox: &mut SignalMailbox,
    events: &mpsc::Sender<EventKind>,
) -> Result<AgentOutcome, RunError> {
    let _ = events
        .send(EventKind::AgentStart { step_id: step_id.to_string(), prompt: config.prompt.clone(), system: config.system.clone() })
        .await;
    let messages = vec![Message::user(Value::String(config.prompt.clone()))];
    drive_loop(step_id, title, &config, llm, mailbox, events, messages, 1, 0).await
}

/// Resumes an agent step from a persisted [`AgentContext`].
pub async fn resume_agent_loop(
    context: AgentContext,
    webhook_response: Option<(String, String, Value)>,
    config: AgentConfig,
    llm: &dyn LlmClient,
    mailbox: &mut SignalMailbox,
    events: &mpsc::Sender<EventKind>,
    total_tokens_so_far: u32,
) -> Result<AgentOutcome, RunError> {
    let step_id = context.step_id.clone();
    let title = context.title.clone();
    let mut messages = vec![Message::user(Value::String(context.prompt.clone()))];
    messages.extend(context.response_messages.clone());

    match (context.pending_tool_call_id.clone(), webhook_response) {
        (Some(tool_call_id), Some((slug, identifier, response))) => {
            // Webhook resume: emit WEBHOOK_RESPONSE, then the
            // AGENT_TOOL_RESULT that finally resolves the pending tool call.
            let _ = events
                .send(EventKind::WebhookResponse { slug, identifier, response: response.clone() })
                .await;
            let tool_name = context.pending_tool_name.clone().unwrap_or_default();
            let _ = events
                .send(EventKind::AgentToolResult { id: tool_call_id.clone(), result: response.clone() })
                .await;
            let tool_result_message = Message::tool_result(tool_call_id, tool_name, response);
            let _ = events.send(EventKind::AgentRawResponseMessage { message: tool_result_message.clone() }).await;
            messages.push(tool_result_message);
        }
        _ => {
            // Pause resume: rebuild history, emit nothing extra.
        }
    }

    drive_loop(&step_id, &title, &config, llm, mailbox, events, messages, 1, total_tokens_so_far).await
}

#[allow(clippy::too_many_arguments)]
async fn drive_loop(
    step_id: &str,
    title: &str,
    config: &AgentConfig,
    llm: &dyn LlmClient,
    mailbox: &mut SignalMailbox,
    events: &mpsc::Sender<EventKind>,
    mut messages: Vec<Message>,
    mut iteration: u32,
    mut total_tokens: u32,
) -> Result<AgentOutcome, RunError> {
    let _span = tracing::info_span!("agent_loop", step_id = %step_id, title = %title).entered();
    let system = match &config.system {
        Some(extra) => format!("{DEFAULT_SYSTEM_PROMPT}\n\n{extra}"),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    loop {
        // Step 1: drain signals before each iteration.
        for signal in mailbox.drain() {
            match signal {
                Signal::Kill => {
                    let _ = events.send(EventKind::Cancelled).await;
                    return Ok(AgentOutcome::Cancelled);
                }
                Signal::Pause => {
                    let _ = events.send(EventKind::Paused).await;
                    return Ok(AgentOutcome::Paused);
                }
                Signal::UserMessage { content } => {
                    messages.push(Message::user(Value::String(content.clone())));
                    let _ = events.send(EventKind::AgentUserMessage { content: content.clone() }).await;
                    let raw = Message::user(Value::String(content));
                    let _ = events.send(EventKind::AgentRawResponseMessage { message: raw }).await;
                }
                Signal::WebhookResponse { .. } => {
                    // Already consumed by the resume path that constructed this loop.
                }
            }
        }

        // Step 2: iteration limit.
        if iteration > config.max_iterations {
            tracing::warn!(step_id, iteration, max = config.max_iterations, "agent iteration limit reached");
            let _ = events.send(EventKind::AgentIterationLimit { iteration }).await;
            return Ok(AgentOutcome::Complete { result: Value::Null });
        }

        tracing::debug!(step_id, iteration, "agent iteration calling provider");
        // Step 3: call the provider.
        let request = LlmRequest {
            system: system.clone(),
            messages: messages.clone(),
            tools: config.tools.specs(),
            tool_choice: config.tool_choice,
        };
        let response = llm.generate(request).await.map_err(RunError::Agent)?;

        // Step 4: replace responseMessages, emit the last raw message.
        messages = response.messages;
        if let Some(last) = messages.last() {
            let _ = events.send(EventKind::AgentRawResponseMessage { message: last.clone() }).await;
        }

        // Step 5: token accounting.
        total_tokens += response.tokens_used;
        let _ = events
            .send(EventKind::AgentIteration { iteration, tokens_this_iteration: response.tokens_used, total_tokens })
            .await;
        if let Some(max_tokens) = config.max_tokens {
            if total_tokens > max_tokens {
                tracing::warn!(step_id, total_tokens, max_tokens, "agent token limit reached");
                let _ = events.send(EventKind::AgentTokenLimit { total_tokens }).await;
                return Ok(AgentOutcome::Complete { result: Value::Null });
            }
        }

        // Step 6: plain assistant text with no tool calls ends the step.
        if response.tool_calls.is_empty() {
            if let Some(text) = response.text.clone() {
                let _ = events.send(EventKind::AgentAssistantMessage { content: text.clone() }).await;
                return Ok(AgentOutcome::Complete { result: Value::String(text) });
            }
        }

        // Step 7/8: walk tool calls in order.
        let mut pending_webhook: Option<(String, String)> = None;
        let mut pending_registrations: Vec<crate::event::WebhookRegistration> = Vec::new();
        for call in &response.tool_calls {
            let _ = events
                .send(EventKind::AgentToolCall { id: call.id.clone(), name: call.name.clone(), arguments: call.arguments.clone() })
                .await;

            let Some(tool) = config.tools.get(&call.name) else {
                return Err(RunError::Agent(AgentError::UnknownTool(call.name.clone())));
            };

            if tool.is_terminal() {
                let merged = config.tools.merge_terminal_result(&call.arguments);
                let _ = events.send(EventKind::AgentComplete { result: merged.clone() }).await;
                return Ok(AgentOutcome::Complete { result: merged });
            }

            let executor = match tool {
                crate::tool::ToolDef::Builtin { executor, .. } | crate::tool::ToolDef::UserDefined { executor, .. } => {
                    Arc::clone(executor)
                }
                crate::tool::ToolDef::Terminal { .. } => unreachable!("handled above"),
            };

            let outcome = executor
                .execute(call.arguments.clone())
                .await
                .map_err(|e| RunError::Agent(AgentError::ToolExecution(call.name.clone(), e.to_string())))?;

            match outcome {
                ToolOutcome::Result(result) => {
                    let _ = events.send(EventKind::AgentToolResult { id: call.id.clone(), result: result.clone() }).await;
                    let tool_result_message = Message::tool_result(call.id.clone(), call.name.clone(), result);
                    let _ = events.send(EventKind::AgentRawResponseMessage { message: tool_result_message.clone() }).await;
                    messages.push(tool_result_message);
                }
                ToolOutcome::WaitFor(registrations) => {
                    let placeholder = serde_json::json!({"status": "waiting_for_webhook", "webhooks": registrations});
                    let _ = events.send(EventKind::AgentToolResult { id: call.id.clone(), result: placeholder.clone() }).await;
                    // Local-only placeholder tool-result message: reconstructed on
                    // resume, never emitted as its own AGENT_RAW_RESPONSE_MESSAGE
                    //.
                    messages.push(Message::tool_result(call.id.clone(), call.name.clone(), placeholder));
                    // First wins: if an earlier call in this batch already
                    // registered a webhook, later ones still run (so their
                    // results are still recorded) but don't replace it.
                    if pending_webhook.is_none() {
                        pending_webhook = Some((call.id.clone(), call.name.clone()));
                        pending_registrations = registrations;
                    }
                }
            }
        }

        // Deferred to the end of the batch so a trailing non-webhook tool
        // call's AGENT_TOOL_RESULT is always emitted before AGENT_WEBHOOK.
        if let Some((id, tool_name)) = pending_webhook {
            let _ = events.send(EventKind::AgentWebhook { id, tool_name, wait_for: pending_registrations.clone() }).await;
            let _ = events.send(EventKind::Webhook { wait_for: pending_registrations }).await;
            return Ok(AgentOutcome::WaitingOnWebhook);
        }

        iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, ScriptedLlmClient};
    use crate::tool::ToolSpec;
    use tokio::sync::mpsc;

    fn mailbox() -> (mpsc::UnboundedSender<Signal>, SignalMailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, SignalMailbox::new(rx))
    }

    /// **Scenario**: a single `done` call completes the step with its merged result.
    #[tokio::test]
    async fn done_tool_completes_step() {
        let tools = ToolRegistry::new(vec![], None);
        let config = AgentConfig::new("say hi", tools);
        let client = ScriptedLlmClient::new(vec![LlmResponse {
            messages: vec![Message::assistant("calling done")],
            tokens_used: 10,
            text: None,
            tool_calls: vec![crate::tool::ToolCall { id: "c1".into(), name: DONE_TOOL_NAME.into(), arguments: serde_json::json!({"result": "ok"}) }],
        }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let outcome = run_agent_loop("step-1", "Ask", config, &client, &mut mb, &events_tx).await.unwrap();
        match outcome {
            AgentOutcome::Complete { result } => assert_eq!(result, serde_json::json!({"result": "ok"})),
            _ => panic!("expected Complete"),
        }
        let mut saw_agent_complete = false;
        while let Ok(kind) = events_rx.try_recv() {
            if matches!(kind, EventKind::AgentComplete { .. }) {
                saw_agent_complete = true;
            }
        }
        assert!(saw_agent_complete);
    }

    /// **Scenario**: plain assistant text with no tool calls completes the step.
    #[tokio::test]
    async fn assistant_text_with_no_tools_completes() {
        let tools = ToolRegistry::new(vec![], None);
        let config = AgentConfig::new("say hi", tools);
        let client = ScriptedLlmClient::new(vec![LlmResponse {
            messages: vec![Message::assistant("hello there")],
            tokens_used: 5,
            text: Some("hello there".into()),
            tool_calls: vec![],
        }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, _events_rx) = mpsc::channel(64);
        let outcome = run_agent_loop("step-1", "Ask", config, &client, &mut mb, &events_tx).await.unwrap();
        match outcome {
            AgentOutcome::Complete { result } => assert_eq!(result, serde_json::json!("hello there")),
            _ => panic!("expected Complete"),
        }
    }

    /// **Scenario**: a KILL signal queued before the loop starts ends it as Cancelled.
    #[tokio::test]
    async fn kill_signal_cancels_before_first_call() {
        let tools = ToolRegistry::new(vec![], None);
        let config = AgentConfig::new("say hi", tools);
        let client = ScriptedLlmClient::new(vec![LlmResponse { messages: vec![], tokens_used: 0, text: Some("never".into()), tool_calls: vec![] }]);
        let (tx, mut mb) = mailbox();
        tx.send(Signal::Kill).unwrap();
        let (events_tx, _events_rx) = mpsc::channel(64);
        let outcome = run_agent_loop("step-1", "Ask", config, &client, &mut mb, &events_tx).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Cancelled));
    }

    /// **Scenario**: exceeding max_iterations completes the step via AGENT_ITERATION_LIMIT.
    #[tokio::test]
    async fn iteration_limit_completes_step() {
        let tools = ToolRegistry::new(vec![], None);
        let mut config = AgentConfig::new("loop forever", tools);
        config.max_iterations = 0;
        let client = ScriptedLlmClient::new(vec![LlmResponse { messages: vec![], tokens_used: 0, text: Some("x".into()), tool_calls: vec![] }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let outcome = run_agent_loop("step-1", "Ask", config, &client, &mut mb, &events_tx).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Complete { .. }));
        let mut saw_limit = false;
        while let Ok(kind) = events_rx.try_recv() {
            if matches!(kind, EventKind::AgentIterationLimit { .. }) {
                saw_limit = true;
            }
        }
        assert!(saw_limit);
    }

    /// **Scenario**: a tool that returns WaitFor suspends the run on AGENT_WEBHOOK + WEBHOOK.
    #[tokio::test]
    async fn tool_wait_for_suspends_on_webhook() {
        struct EscalateTool;
        #[async_trait::async_trait]
        impl crate::tool::ToolExecutor for EscalateTool {
            async fn execute(&self, _args: Value) -> Result<ToolOutcome, AgentError> {
                Ok(ToolOutcome::WaitFor(vec![crate::event::WebhookRegistration {
                    slug: "support".into(),
                    identifier: "t1".into(),
                    token: "tok".into(),
                }]))
            }
        }
        let spec = ToolSpec { name: "escalate".into(), description: "".into(), input_schema: serde_json::json!({}) };
        let tools = ToolRegistry::new(vec![(spec, Arc::new(EscalateTool))], None);
        let config = AgentConfig::new("help", tools);
        let client = ScriptedLlmClient::new(vec![LlmResponse {
            messages: vec![Message::assistant("calling escalate")],
            tokens_used: 1,
            text: None,
            tool_calls: vec![crate::tool::ToolCall { id: "c1".into(), name: "escalate".into(), arguments: serde_json::json!({}) }],
        }]);
        let (_tx, mut mb) = mailbox();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let outcome = run_agent_loop("step-1", "Ask", config, &client, &mut mb, &events_tx).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::WaitingOnWebhook));
        let mut saw_agent_webhook = false;
        let mut saw_webhook = false;
        while let Ok(kind) = events_rx.try_recv() {
            match kind {
                EventKind::AgentWebhook { id, .. } => {
                    assert_eq!(id, "c1");
                    saw_agent_webhook = true;
                }
                EventKind::Webhook { .. } => saw_webhook = true,
                _ => {}
            }
        }
        assert!(saw_agent_webhook && saw_webhook);
    }
}
