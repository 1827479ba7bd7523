//! Running-Brain Tree and StepInfo, the runtime-only state the
//! state machine reconstructs by projection.

use serde::{Deserialize, Serialize};

use crate::event::JsonPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Error,
    /// Assigned when a preceding guard failed; the step was never started.
    Halted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<JsonPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_steps: Option<Vec<StepInfo>>,
}

impl StepInfo {
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), status: StepStatus::Pending, patch: None, inner_steps: None }
    }
}

/// A node in the Running-Brain Tree. `brain_run_id` is shared across the
/// whole tree — only the root's id is the external run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainNode {
    pub brain_run_id: String,
    pub title: String,
    pub parent_step_id: Option<String>,
    pub steps: Vec<StepInfo>,
    pub inner_brain: Option<Box<BrainNode>>,
}

impl BrainNode {
    pub fn new(brain_run_id: impl Into<String>, title: impl Into<String>, parent_step_id: Option<String>) -> Self {
        Self { brain_run_id: brain_run_id.into(), title: title.into(), parent_step_id, steps: Vec::new(), inner_brain: None }
    }

    /// The deepest node is the currently executing brain.
    pub fn deepest_mut(&mut self) -> &mut BrainNode {
        match &mut self.inner_brain {
            Some(inner) => inner.deepest_mut(),
            None => self,
        }
    }

    pub fn deepest(&self) -> &BrainNode {
        match &self.inner_brain {
            Some(inner) => inner.deepest(),
            None => self,
        }
    }

    pub fn depth(&self) -> u32 {
        1 + self.inner_brain.as_ref().map(|b| b.depth()).unwrap_or(0)
    }

    /// Splices `inner`'s steps onto the step in `self.steps` matching
    /// `inner.parent_step_id`, as `inner_steps`, then marks that step
    /// COMPLETE. Done *before* the inner node is removed, so an interrupted
    /// view never loses the completed subtree.
    pub fn splice_completed_inner(&mut self, inner: &BrainNode) {
        if let Some(parent_step_id) = &inner.parent_step_id {
            if let Some(step) = self.steps.iter_mut().find(|s| &s.id == parent_step_id) {
                step.inner_steps = Some(inner.steps.clone());
                step.status = StepStatus::Complete;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a three-level tree reports depth 3 and resolves to the innermost node.
    #[test]
    fn deepest_and_depth_through_nesting() {
        let mut root = BrainNode::new("run-1", "Root", None);
        let mut mid = BrainNode::new("run-1", "Mid", Some("step-a".into()));
        let leaf = BrainNode::new("run-1", "Leaf", Some("step-b".into()));
        mid.inner_brain = Some(Box::new(leaf));
        root.inner_brain = Some(Box::new(mid));

        assert_eq!(root.depth(), 3);
        assert_eq!(root.deepest().title, "Leaf");
    }

    /// **Scenario**: splicing a completed inner brain marks the parent step COMPLETE
    /// and attaches its steps as `inner_steps`.
    #[test]
    fn splice_completed_inner_marks_parent_step() {
        let mut root = BrainNode::new("run-1", "Root", None);
        root.steps.push(StepInfo::pending("step-a", "RunInner"));
        root.steps[0].status = StepStatus::Running;

        let mut inner = BrainNode::new("run-1", "Inner", Some("step-a".into()));
        inner.steps.push(StepInfo::pending("inner-step", "Do thing"));
        inner.steps[0].status = StepStatus::Complete;

        root.splice_completed_inner(&inner);

        assert_eq!(root.steps[0].status, StepStatus::Complete);
        assert_eq!(root.steps[0].inner_steps.as_ref().unwrap().len(), 1);
    }
}
