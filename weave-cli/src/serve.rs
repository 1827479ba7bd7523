//! `weave serve`: runs the dispatcher in-process, mirroring `loom-cli`'s own
//! `Command::Serve` subcommand in `cli/src/main.rs`, backed by
//! `loom-cli/src/serve.rs`. The other subcommands are a remote client to
//! exactly this surface.
//!
//! Brain registration has no file/template loading mechanism, so this seeds the
//! registry with a small builtin echo brain purely so the dispatcher has
//! something to run out of the box; real deployments register brains in
//! code before calling `weave_serve::build_state`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weave::llm::ScriptedLlmClient;
use weave::{BrainBuilder, BrainRegistry, LlmClient, RunError, StepContext, StepExecutor, StepOutcome};
use weave_serve::StorageBackend;

struct Echo;
#[async_trait]
impl StepExecutor for Echo {
    async fn run(&self, state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
        Ok(StepOutcome::State(state))
    }
}

fn seed_registry() -> BrainRegistry {
    let mut registry = BrainRegistry::new();
    let brain = BrainBuilder::new("Echo").description("returns its input state unchanged").step("Echo", Echo).build();
    registry.register("echo", brain);
    registry
}

pub struct ServeOptions {
    pub addr: Option<String>,
    pub sqlite_path: Option<String>,
}

pub async fn run(opts: ServeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = seed_registry();
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![]));
    let backend = match opts.sqlite_path {
        Some(path) => StorageBackend::Sqlite(path),
        None => StorageBackend::Memory,
    };
    let state = weave_serve::build_state(registry, llm, backend)?;
    weave_serve::serve(opts.addr.as_deref(), state).await
}
