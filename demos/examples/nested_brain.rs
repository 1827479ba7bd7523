//! An outer brain that delegates to an inner brain via a `Brain` (nested)
//! block, then folds the inner result back into the parent's state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weave::block::{FnStep, NestedBrainBlock, NestedBrainInit, NestedBrainReducer};
use weave::{Block, Brain, LlmClient, MemoryEventLog, RunActor, RunError, ScriptedLlmClient, StepOutcome};

struct SeedInner;
#[async_trait]
impl NestedBrainInit for SeedInner {
    async fn initial_state(&self, parent_state: &Value) -> Result<Value, RunError> {
        Ok(serde_json::json!({"seed": parent_state.get("seed").cloned().unwrap_or(Value::Null)}))
    }
}

struct FoldInner;
#[async_trait]
impl NestedBrainReducer for FoldInner {
    async fn reduce(&self, parent_state: &Value, inner_state: &Value) -> Result<Value, RunError> {
        let mut obj = parent_state.as_object().cloned().unwrap_or_default();
        obj.insert("innerResult".into(), inner_state.clone());
        Ok(Value::Object(obj))
    }
}

fn main() {
    tokio::runtime::Runtime::new().unwrap().block_on(run());
}

async fn run() {
    let inner = Brain::new(
        "DoubleSeed",
        vec![Block::Step {
            title: "Double".into(),
            executor: Arc::new(FnStep(|state, _ctx| async move {
                let seed = state.get("seed").and_then(Value::as_i64).unwrap_or(0);
                Ok(StepOutcome::State(serde_json::json!({"doubled": seed * 2})))
            })),
        }],
    );

    let outer = Brain::new(
        "Outer",
        vec![
            Block::Step {
                title: "Seed".into(),
                executor: Arc::new(FnStep(|_state, _ctx| async move { Ok(StepOutcome::State(serde_json::json!({"seed": 21}))) })),
            },
            Block::Brain(NestedBrainBlock { title: "RunInner".into(), brain: Arc::new(inner), init: Arc::new(SeedInner), reducer: Arc::new(FoldInner) }),
        ],
    );

    let log: Arc<dyn weave::EventLog> = Arc::new(MemoryEventLog::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
    let actor = RunActor::new("demo-nested", Arc::new(outer), Arc::clone(&log), llm);

    let mut watch = actor.watch().await.expect("watch");
    actor.start(Value::Null, BTreeMap::new()).await.expect("start");

    while let Some(event) = watch.recv().await {
        println!("{}", serde_json::to_string(&event).unwrap());
        if event.kind.is_root_terminal() {
            break;
        }
    }
}
