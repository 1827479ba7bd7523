//! A brain with a single `Agent` block: the scripted LLM calls `done`
//! immediately, demonstrating the tool-use loop's terminal-tool path.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use weave::{AgentConfig, Block, Brain, LlmClient, LlmResponse, Message, MemoryEventLog, RunActor, ScriptedLlmClient, ToolCall, ToolRegistry};

fn main() {
    tokio::runtime::Runtime::new().unwrap().block_on(run());
}

async fn run() {
    let blocks = vec![Block::Agent {
        title: "Ask".into(),
        configure: Arc::new(|_state: &Value| {
            let tools = ToolRegistry::new(vec![], None);
            AgentConfig::new("Say hello and finish.", tools)
        }),
    }];
    let brain = Arc::new(Brain::new("Greeter", blocks));

    let log: Arc<dyn weave::EventLog> = Arc::new(MemoryEventLog::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![LlmResponse {
        messages: vec![Message::assistant("calling done")],
        tokens_used: 12,
        text: None,
        tool_calls: vec![ToolCall { id: "c1".into(), name: "done".into(), arguments: serde_json::json!({"result": "hello!"}) }],
    }]));
    let actor = RunActor::new("demo-agent", brain, Arc::clone(&log), llm);

    let mut watch = actor.watch().await.expect("watch");
    actor.start(Value::Null, BTreeMap::new()).await.expect("start");

    while let Some(event) = watch.recv().await {
        println!("{}", serde_json::to_string(&event).unwrap());
        if event.kind.is_root_terminal() {
            break;
        }
    }
}
