//! Node state and execution context: the mutable, per-run data the
//! scheduler reads and writes as it dispatches nodes.
//!
//! `NodeState` transitions go through an explicit table
//! (`can_transition_to`); an illegal move is always an engine bug
//! (`EngineError::Internal`), never a recoverable path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, NodeError};
use crate::executor::NodeOutput;

/// The lifecycle status of a single node within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied; eligible for dispatch.
    Ready,
    /// Dispatched to its executor; awaiting a result.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully and will not be retried further.
    Failed,
    /// Bypassed because its condition evaluated false.
    Skipped,
    /// Aborted due to run cancellation.
    Cancelled,
}

impl NodeStatus {
    /// Whether this status ends the node's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }

    fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::{Cancelled, Completed, Failed, Pending, Ready, Running, Skipped};
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Ready) // retry: back to ready for the next attempt
                | (Running, Cancelled)
        )
    }
}

/// Mutable per-node record within one [`ExecutionContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// Number of attempts made so far (0 before the first dispatch).
    pub attempts: u32,
    /// When the node first transitioned to `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the node reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Output produced by a `Completed` node.
    pub output: Option<Map<String, Value>>,
    /// Artifacts produced by a `Completed` node.
    pub artifacts: Vec<String>,
    /// Recorded failure, set on `Failed`/`Cancelled`.
    pub error: Option<NodeError>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            output: None,
            artifacts: Vec::new(),
            error: None,
        }
    }
}

fn illegal(from: NodeStatus, to: NodeStatus) -> EngineError {
    EngineError::Internal(format!("illegal node transition: {from:?} -> {to:?}"))
}

impl NodeState {
    fn transition(&mut self, to: NodeStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(to) {
            return Err(illegal(self.status, to));
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> Ready.
    pub fn mark_ready(&mut self) -> Result<(), EngineError> {
        self.transition(NodeStatus::Ready)
    }

    /// Ready -> Running, or Running -> Running again on a retry attempt.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status == NodeStatus::Running {
            self.attempts += 1;
            return Ok(());
        }
        self.transition(NodeStatus::Running)?;
        self.attempts += 1;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// Running -> Completed, setting output/artifacts atomically.
    pub fn mark_completed(
        &mut self,
        now: DateTime<Utc>,
        output: NodeOutput,
    ) -> Result<(), EngineError> {
        self.transition(NodeStatus::Completed)?;
        self.output = Some(output.output);
        self.artifacts = output.artifacts;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Running -> Failed, recording the terminal error.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: NodeError) -> Result<(), EngineError> {
        self.transition(NodeStatus::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Running -> Ready, for a retry: attempts budget remains intact, the
    /// status returns to `Ready` so the scheduler redispatches it.
    pub fn mark_retry(&mut self) -> Result<(), EngineError> {
        self.transition(NodeStatus::Ready)
    }

    /// Pending -> Skipped: an unmet condition, never a failure.
    pub fn mark_skipped(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NodeStatus::Skipped)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Any non-terminal status -> Cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NodeStatus::Cancelled)?;
        self.error = Some(NodeError::Cancelled);
        self.finished_at = Some(now);
        Ok(())
    }
}

/// The status of an entire execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// At least one node is pending, ready, or running.
    Running,
    /// Paused by the caller; no further dispatch until resumed.
    Paused,
    /// Every node reached `Completed` or `Skipped`.
    Completed,
    /// At least one node reached `Failed` and no recovery is possible.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status ends the run's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled)
    }
}

/// The full mutable state of a single workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique id for this execution, used as the store key.
    pub execution_id: String,
    /// Id of the workflow definition this execution runs.
    pub workflow_id: String,
    /// The run-wide input supplied by the caller.
    pub global_input: Value,
    /// Per-node mutable state, keyed by node id.
    pub node_states: HashMap<String, NodeState>,
    /// Completed nodes' outputs, keyed by node id, for fast lookup without
    /// walking `node_states`.
    pub outputs: HashMap<String, Value>,
    /// All artifacts produced across the run, in completion order.
    pub artifacts: Vec<String>,
    /// When the execution was created.
    pub started_at: DateTime<Utc>,
    /// Last time any node transitioned or an event was emitted.
    pub updated_at: DateTime<Utc>,
    /// Current run-level status.
    pub status: ExecutionStatus,
}

impl ExecutionContext {
    /// Create a fresh context for the given node ids, all `Pending`.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        global_input: Value,
        node_ids: impl IntoIterator<Item = String>,
        now: DateTime<Utc>,
    ) -> Self {
        let node_states = node_ids
            .into_iter()
            .map(|id| (id, NodeState::default()))
            .collect();
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            global_input,
            node_states,
            outputs: HashMap::new(),
            artifacts: Vec::new(),
            started_at: now,
            updated_at: now,
            status: ExecutionStatus::Running,
        }
    }

    /// Look up a node's output value, if it has completed.
    #[must_use]
    pub fn get_node_output(&self, id: &str) -> Option<&Value> {
        self.outputs.get(id)
    }

    /// Look up a node's full mutable state.
    #[must_use]
    pub fn get_node_state(&self, id: &str) -> Option<&NodeState> {
        self.node_states.get(id)
    }

    /// Record a completed node's output into the flat `outputs` map and
    /// accumulate its artifacts, touching `updated_at`.
    pub fn record_output(&mut self, id: &str, output: &Map<String, Value>, artifacts: &[String], now: DateTime<Utc>) {
        self.outputs.insert(id.to_string(), Value::Object(output.clone()));
        self.artifacts.extend(artifacts.iter().cloned());
        self.updated_at = now;
    }

    /// Whether every node has reached a terminal status.
    #[must_use]
    pub fn all_nodes_terminal(&self) -> bool {
        self.node_states.values().all(|s| s.status.is_terminal())
    }

    /// Whether any node is in `Failed`.
    #[must_use]
    pub fn any_node_failed(&self) -> bool {
        self.node_states.values().any(|s| s.status == NodeStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_node_state_is_pending() {
        let state = NodeState::default();
        assert_eq!(state.status, NodeStatus::Pending);
        assert_eq!(state.attempts, 0);
    }

    #[test]
    fn happy_path_transitions_succeed() {
        let mut state = NodeState::default();
        let now = Utc::now();
        state.mark_ready().unwrap();
        state.mark_running(now).unwrap();
        state.mark_completed(now, NodeOutput::default()).unwrap();
        assert_eq!(state.status, NodeStatus::Completed);
        assert_eq!(state.attempts, 1);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut state = NodeState::default();
        let err = state.mark_running(Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[test]
    fn retry_returns_running_to_ready_and_preserves_attempts_budget() {
        let mut state = NodeState::default();
        let now = Utc::now();
        state.mark_ready().unwrap();
        state.mark_running(now).unwrap();
        state.mark_retry().unwrap();
        assert_eq!(state.status, NodeStatus::Ready);
        state.mark_running(now).unwrap();
        assert_eq!(state.attempts, 2);
    }

    #[test]
    fn skipped_node_never_reports_as_failed() {
        let mut state = NodeState::default();
        state.mark_skipped(Utc::now()).unwrap();
        assert_eq!(state.status, NodeStatus::Skipped);
        assert!(state.status.is_terminal());
    }

    #[test]
    fn execution_context_all_nodes_terminal() {
        let mut ctx = ExecutionContext::new(
            "exec-1",
            "wf-1",
            Value::Null,
            vec!["a".to_string(), "b".to_string()],
            Utc::now(),
        );
        assert!(!ctx.all_nodes_terminal());
        ctx.node_states.get_mut("a").unwrap().mark_skipped(Utc::now()).unwrap();
        ctx.node_states.get_mut("b").unwrap().mark_skipped(Utc::now()).unwrap();
        assert!(ctx.all_nodes_terminal());
    }
}
