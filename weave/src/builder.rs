//! A small in-crate brain-definition builder. Lets demos assemble a
//! [`Brain`]'s block list with ordinary Rust method chaining, mirroring
//! `loom::graph::StateGraph`'s fluent `add_node`/`add_edge` builder shape
//! but producing a straight-line block list instead of a graph.

use std::sync::Arc;

use crate::agent::AgentConfig;
use crate::block::{
    AgentConfigurator, BatchBlock, BatchItemProcessor, BatchItemSource, Block, Brain, GuardPredicate,
    NestedBrainBlock, NestedBrainInit, NestedBrainReducer, StepExecutor, UiPageGenerator, WaitAction,
};

/// Fluent assembler for a [`Brain`]'s ordered block list.
#[derive(Default)]
pub struct BrainBuilder {
    title: String,
    description: Option<String>,
    blocks: Vec<Block>,
}

impl BrainBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), description: None, blocks: Vec::new() }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step(mut self, title: impl Into<String>, executor: impl StepExecutor + 'static) -> Self {
        self.blocks.push(Block::Step { title: title.into(), executor: Arc::new(executor) });
        self
    }

    pub fn guard(mut self, title: impl Into<String>, predicate: impl GuardPredicate + 'static) -> Self {
        self.blocks.push(Block::Guard { title: title.into(), predicate: Arc::new(predicate) });
        self
    }

    pub fn wait(mut self, title: impl Into<String>, action: impl WaitAction + 'static) -> Self {
        self.blocks.push(Block::Wait { title: title.into(), action: Arc::new(action) });
        self
    }

    pub fn ui(mut self, title: impl Into<String>, generator: impl UiPageGenerator + 'static) -> Self {
        self.blocks.push(Block::Ui { title: title.into(), generator: Arc::new(generator) });
        self
    }

    pub fn agent(mut self, title: impl Into<String>, configure: impl Fn(&serde_json::Value) -> AgentConfig + Send + Sync + 'static) -> Self {
        let configurator: AgentConfigurator = Arc::new(configure);
        self.blocks.push(Block::Agent { title: title.into(), configure: configurator });
        self
    }

    pub fn batch(
        mut self,
        title: impl Into<String>,
        source: impl BatchItemSource + 'static,
        processor: impl BatchItemProcessor + 'static,
        chunk_size: usize,
    ) -> Self {
        self.blocks.push(Block::Batch(BatchBlock { title: title.into(), source: Arc::new(source), processor: Arc::new(processor), chunk_size }));
        self
    }

    pub fn nested_brain(
        mut self,
        title: impl Into<String>,
        brain: Brain,
        init: impl NestedBrainInit + 'static,
        reducer: impl NestedBrainReducer + 'static,
    ) -> Self {
        self.blocks.push(Block::Brain(NestedBrainBlock { title: title.into(), brain: Arc::new(brain), init: Arc::new(init), reducer: Arc::new(reducer) }));
        self
    }

    pub fn build(self) -> Brain {
        let mut brain = Brain::new(self.title, self.blocks);
        if let Some(description) = self.description {
            brain = brain.with_description(description);
        }
        brain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{StepContext, StepOutcome};
    use crate::error::RunError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct SetCount;
    #[async_trait]
    impl StepExecutor for SetCount {
        async fn run(&self, _state: Value, _ctx: &StepContext) -> Result<StepOutcome, RunError> {
            Ok(StepOutcome::State(serde_json::json!({"count": 1})))
        }
    }

    /// **Scenario**: a builder chain of two steps produces a brain with matching titles in order.
    #[test]
    fn builder_chains_blocks_in_order() {
        let brain = BrainBuilder::new("Counter").description("counts up").step("A", SetCount).step("B", SetCount).build();
        assert_eq!(brain.title, "Counter");
        assert_eq!(brain.description.as_deref(), Some("counts up"));
        assert_eq!(brain.blocks.len(), 2);
        assert_eq!(brain.blocks[0].title(), "A");
        assert_eq!(brain.blocks[1].title(), "B");
    }
}
