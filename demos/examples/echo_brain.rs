//! Minimal two-step brain: `Init` seeds `{count: 1}`, `Increment` bumps it,
//! driven through a real `RunActor` rather than the bare generator.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weave::{BrainBuilder, LlmClient, MemoryEventLog, RunActor, RunError, ScriptedLlmClient, StepContext, StepExecutor, StepOutcome};

struct Init;
#[async_trait]
impl StepExecutor for Init {
    async fn run(&self, _state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
        Ok(StepOutcome::State(serde_json::json!({"count": 1})))
    }
}

struct Increment;
#[async_trait]
impl StepExecutor for Increment {
    async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
        let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
        Ok(StepOutcome::State(serde_json::json!({"count": count + 1})))
    }
}

#[tokio::main]
async fn main() {
    let brain = Arc::new(BrainBuilder::new("Counter").step("A", Init).step("B", Increment).build());
    let log: Arc<dyn weave::EventLog> = Arc::new(MemoryEventLog::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
    let actor = RunActor::new("demo-echo", brain, Arc::clone(&log), llm);

    let mut watch = actor.watch().await.expect("watch");
    actor.start(Value::Null, BTreeMap::new()).await.expect("start");

    while let Some(event) = watch.recv().await {
        println!("{}", serde_json::to_string(&event).unwrap());
        if event.kind.is_root_terminal() {
            break;
        }
    }
}
