//! Executor adapter: the uniform invocation boundary between the scheduler
//! and user-supplied node executors.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Read-only input handed to a node executor on dispatch.
#[derive(Debug, Clone)]
pub struct NodeEnvelope {
    /// Outputs of this node's direct dependencies, keyed by dependency id.
    pub dependency_outputs: HashMap<String, Value>,
    /// Artifacts produced by this node's direct dependencies.
    pub dependency_artifacts: HashMap<String, Vec<String>>,
    /// The run-wide, caller-supplied input.
    pub global_context: Value,
    /// Read-only view of every output produced so far, for diagnostics and
    /// condition evaluation.
    pub all_outputs: HashMap<String, Value>,
    /// The id of the node being executed.
    pub node_id: String,
    /// 1-indexed attempt number for this dispatch.
    pub attempt: u32,
    /// Tripped when the run is paused/cancelled; executors should observe
    /// this at I/O boundaries and return promptly.
    pub cancellation: CancellationToken,
}

/// The normalized success shape returned by a node executor.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// Arbitrary output map, visible to dependents via `dependency_outputs`.
    pub output: Map<String, Value>,
    /// Opaque artifact identifiers produced by this node.
    pub artifacts: Vec<String>,
}

impl NodeOutput {
    /// Construct an output with no artifacts.
    #[must_use]
    pub fn new(output: Map<String, Value>) -> Self {
        Self { output, artifacts: Vec::new() }
    }

    /// Construct an output with both a map and artifact list.
    #[must_use]
    pub fn with_artifacts(output: Map<String, Value>, artifacts: Vec<String>) -> Self {
        Self { output, artifacts }
    }
}

impl From<Map<String, Value>> for NodeOutput {
    fn from(output: Map<String, Value>) -> Self {
        // A returned map with no artifacts is normalized here so executors
        // need not spell out an empty artifact list.
        NodeOutput::new(output)
    }
}

/// The typed failure shape returned by a node executor.
///
/// Absence of a kind defaults to `Transient` — callers using
/// [`NodeExecutorError::from`] on a bare string get that default.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeExecutorError {
    /// Failure that suggests retrying may succeed.
    #[error("transient executor failure: {0}")]
    Transient(String),
    /// Failure the executor declares unrecoverable.
    #[error("fatal executor failure: {0}")]
    Fatal(String),
}

impl From<String> for NodeExecutorError {
    fn from(message: String) -> Self {
        NodeExecutorError::Transient(message)
    }
}

impl From<&str> for NodeExecutorError {
    fn from(message: &str) -> Self {
        NodeExecutorError::Transient(message.to_string())
    }
}

/// A node executor: an async function from an input envelope to a result.
///
/// Implementors must be cancellation-aware: when `envelope.cancellation` is
/// tripped they should return or raise promptly. The engine will not
/// interrupt a non-cooperative executor mid-call but will mark the node
/// `cancelled` once control returns.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run the node's work for a single attempt.
    async fn execute(&self, envelope: NodeEnvelope) -> Result<NodeOutput, NodeExecutorError>;
}

/// Test and example support: executors with trivial, deterministic behavior.
pub mod test_support {
    use super::{NodeEnvelope, NodeExecutor, NodeExecutorError, NodeOutput};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Always succeeds with a fixed output map.
    #[derive(Default)]
    pub struct ConstExecutor {
        /// Output returned on every invocation.
        pub output: Map<String, serde_json::Value>,
    }

    #[async_trait]
    impl NodeExecutor for ConstExecutor {
        async fn execute(&self, _envelope: NodeEnvelope) -> Result<NodeOutput, NodeExecutorError> {
            Ok(NodeOutput::new(self.output.clone()))
        }
    }

    /// Fails on the first `fail_attempts` calls, then succeeds.
    pub struct FlakyExecutor {
        fail_attempts: u32,
        calls: Arc<AtomicU32>,
        output: Map<String, serde_json::Value>,
    }

    impl FlakyExecutor {
        /// Fail this many attempts (counted from 1) before succeeding.
        #[must_use]
        pub fn new(fail_attempts: u32) -> Self {
            Self {
                fail_attempts,
                calls: Arc::new(AtomicU32::new(0)),
                output: Map::new(),
            }
        }

        /// Number of times `execute` has been invoked so far.
        #[must_use]
        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NodeExecutor for FlakyExecutor {
        async fn execute(&self, _envelope: NodeEnvelope) -> Result<NodeOutput, NodeExecutorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_attempts {
                Err(NodeExecutorError::Transient(format!("attempt {call} failed")))
            } else {
                Ok(NodeOutput::new(self.output.clone()))
            }
        }
    }

    /// Always fails fatally.
    pub struct FatalExecutor;

    #[async_trait]
    impl NodeExecutor for FatalExecutor {
        async fn execute(&self, _envelope: NodeEnvelope) -> Result<NodeOutput, NodeExecutorError> {
            Err(NodeExecutorError::Fatal("always fails".to_string()))
        }
    }
}
