//! Engine-level error types.
//!
//! Keeps engine-level errors (raised to the caller of
//! [`crate::engine::DagExecutor::execute`]) separate from per-node errors
//! (recorded on [`crate::context::NodeState`], never thrown).

use thiserror::Error;

/// Top-level engine errors: validation failures, resume mismatches, and
/// internal invariant violations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph is malformed, a gate expression failed to parse, or a
    /// resume was requested against an unknown execution id.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Resuming an execution against a graph whose structure hash differs
    /// from the one recorded at the time the context was persisted.
    #[error("workflow mismatch: expected graph hash {expected_hash}, found {found_hash}")]
    WorkflowMismatch {
        /// Hash recorded in the persisted context.
        expected_hash: String,
        /// Hash computed from the graph passed to `execute`.
        found_hash: String,
    },

    /// Failure in the underlying context store.
    #[error("context store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// An engine invariant was violated. This indicates a bug in the
    /// engine, not a user-level failure.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("serialization error: {err}"))
    }
}

/// The kind of failure that ended a node's lifecycle.
///
/// Distinct from [`EngineError`]: these are recorded on [`crate::context::NodeState`]
/// and surfaced via events, never returned from `execute`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeError {
    /// The executor failed in a way that suggests retrying may succeed.
    Transient {
        /// Human-readable failure description.
        message: String,
    },
    /// The executor declared the failure unrecoverable.
    Fatal {
        /// Human-readable failure description.
        message: String,
    },
    /// A BLOCKING quality gate failed after the node otherwise completed.
    PolicyViolation {
        /// Names of the gates that failed.
        failing_gates: Vec<String>,
    },
    /// The node was aborted due to cancellation. Terminal, not a failure
    /// of the node's own logic.
    Cancelled,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Transient { message } => write!(f, "transient: {message}"),
            NodeError::Fatal { message } => write!(f, "fatal: {message}"),
            NodeError::PolicyViolation { failing_gates } => {
                write!(f, "policy violation: {}", failing_gates.join(", "))
            }
            NodeError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl NodeError {
    /// Whether a node ending in this error is eligible for retry by the
    /// scheduler (subject to the node's retry policy still having budget).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Transient { .. })
    }
}
