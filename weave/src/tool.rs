//! Tool registry. `ToolDef` is a tagged variant —
//! `{Builtin(fn) | UserDefined(fn) | Terminal}` — so the agent loop dispatches
//! on the tag rather than on trait-object downcasting.
//!
//! Grounded in `loom::tools::Tool` (name/spec/call) but reshaped: a single
//! trait is split into a closed tag set because a `Terminal` tool (the
//! always-present `done` tool) never executes at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AgentError;
use crate::event::WebhookRegistration;

/// Name, description and JSON schema the provider sees for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call the provider asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A non-terminal tool either returns a plain JSON result or suspends the
/// run on one or more webhook registrations.
pub enum ToolOutcome {
    Result(Value),
    WaitFor(Vec<WebhookRegistration>),
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value) -> Result<ToolOutcome, AgentError>;
}

/// `name → ToolDef` dispatch tag. `Builtin` and `UserDefined`
/// both carry an executor; the distinction is provenance (registry-supplied
/// vs. brain-author-supplied), not behavior — both dispatch through
/// `ToolExecutor::execute`. `Terminal` never executes: the loop completes
/// the step directly from the call's arguments.
pub enum ToolDef {
    Builtin { spec: ToolSpec, executor: Arc<dyn ToolExecutor> },
    UserDefined { spec: ToolSpec, executor: Arc<dyn ToolExecutor> },
    Terminal { spec: ToolSpec },
}

impl ToolDef {
    pub fn spec(&self) -> &ToolSpec {
        match self {
            ToolDef::Builtin { spec, .. } => spec,
            ToolDef::UserDefined { spec, .. } => spec,
            ToolDef::Terminal { spec } => spec,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolDef::Terminal { .. })
    }
}

/// The schema a `done` tool's terminal result is validated/namespaced
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

/// `name → ToolDef` map, always carrying a synthesized `done` tool.
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDef>,
    pub output_schema: Option<OutputSchema>,
}

pub const DONE_TOOL_NAME: &str = "done";

impl ToolRegistry {
    /// Builds a registry from brain-author tools, always synthesizing the
    /// well-known terminal `done` tool.
    pub fn new(user_tools: Vec<(ToolSpec, Arc<dyn ToolExecutor>)>, output_schema: Option<OutputSchema>) -> Self {
        let mut tools = BTreeMap::new();
        for (spec, executor) in user_tools {
            tools.insert(spec.name.clone(), ToolDef::UserDefined { spec, executor });
        }
        let done_spec = match &output_schema {
            Some(schema) => ToolSpec {
                name: DONE_TOOL_NAME.to_string(),
                description: "Signal that the task is complete, supplying the final structured output.".into(),
                input_schema: schema.schema.clone(),
            },
            None => ToolSpec {
                name: DONE_TOOL_NAME.to_string(),
                description: "Signal that the task is complete, supplying a free-form result.".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"result": {"type": "string"}},
                    "required": ["result"],
                }),
            },
        };
        tools.insert(DONE_TOOL_NAME.to_string(), ToolDef::Terminal { spec: done_spec });
        Self { tools, output_schema }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec().clone()).collect()
    }

    /// Merges a `done` call's arguments into brain state, namespaced under
    /// the output schema's name if one was supplied, otherwise spread at
    /// root.
    pub fn merge_terminal_result(&self, args: &Value) -> Value {
        match &self.output_schema {
            Some(schema) => serde_json::json!({ schema.name.clone(): args }),
            None => args.clone(),
        }
    }
}
