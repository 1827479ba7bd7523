//! `Init -> Wait(slack thread) -> Process`: the run pauses on `WEBHOOK`, an
//! external submission resumes it via `RunActor::resume_webhook`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weave::block::{FnStep, WaitAction};
use weave::{Block, Brain, LlmClient, MemoryEventLog, RunActor, RunError, ScriptedLlmClient, StepOutcome, WebhookRegistration};

struct SlackWait;
#[async_trait]
impl WaitAction for SlackWait {
    async fn run(&self, _state: &Value, _run_id: &str) -> Result<Vec<WebhookRegistration>, RunError> {
        Ok(vec![WebhookRegistration { slug: "slack".into(), identifier: "thread-1".into(), token: "tok-1".into() }])
    }
}

fn main() {
    tokio::runtime::Runtime::new().unwrap().block_on(run());
}

async fn run() {
    let blocks = vec![
        Block::Step {
            title: "Init".into(),
            executor: Arc::new(FnStep(|_state, _ctx| async move { Ok(StepOutcome::State(serde_json::json!({"initialized": true}))) })),
        },
        Block::Wait { title: "WaitForSlack".into(), action: Arc::new(SlackWait) },
        Block::Step {
            title: "Process".into(),
            executor: Arc::new(FnStep(|state, ctx| async move {
                let mut obj = state.as_object().cloned().unwrap_or_default();
                let status = ctx.response.as_ref().and_then(|r| r.get("msg")).and_then(Value::as_str).unwrap_or("ok");
                obj.insert("processed".into(), Value::String(status.into()));
                Ok(StepOutcome::State(Value::Object(obj)))
            })),
        },
    ];
    let brain = Arc::new(Brain::new("SlackApproval", blocks));

    let log: Arc<dyn weave::EventLog> = Arc::new(MemoryEventLog::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
    let actor = RunActor::new("demo-webhook", brain, Arc::clone(&log), llm);

    let mut watch = actor.watch().await.expect("watch");
    actor.start(Value::Null, BTreeMap::new()).await.expect("start");

    while let Some(event) = watch.recv().await {
        println!("{}", serde_json::to_string(&event).unwrap());
        if matches!(event.kind, weave::EventKind::Webhook { .. }) {
            break;
        }
    }

    let outcome = actor.resume_webhook("slack", "thread-1", "tok-1", serde_json::json!({"msg": "approved"})).await.expect("resume");
    println!("resume outcome: {:?}", matches!(outcome, weave::WebhookOutcome::Resumed));

    let mut watch = actor.watch().await.expect("watch after resume");
    while let Some(event) = watch.recv().await {
        println!("{}", serde_json::to_string(&event).unwrap());
        if event.kind.is_root_terminal() {
            break;
        }
    }
}
