//! A DAG workflow engine: graph construction and validation, durable
//! execution context, quality-gate policy evaluation, and a scheduler that
//! drives phase-based pipelines to completion with retries, timeouts, and
//! cancellation.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod policy;
pub mod store;

pub use context::{ExecutionContext, ExecutionStatus, NodeState, NodeStatus};
pub use engine::{DagExecutor, ExecutorConfig};
pub use error::{EngineError, EngineResult, NodeError};
pub use executor::{NodeEnvelope, NodeExecutor, NodeExecutorError, NodeOutput};
pub use graph::{BackoffKind, GraphError, GraphIssue, Node, NodeKind, RetryPolicy, WorkflowGraph};
pub use policy::{Gate, PhaseSlo, PolicyEngine, PolicyVerdict, Severity};
pub use store::{ContextStore, StoreError};
