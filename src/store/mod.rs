//! Context store: durable persistence of [`ExecutionContext`] between
//! dispatcher ticks, runs, and process restarts.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ExecutionContext;

/// Schema version written alongside every persisted context, bumped when
/// the `ExecutionContext` shape changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// A persisted context record, carrying the structural hash of the graph
/// it was created against so a resume can detect a mismatched graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedContext {
    /// Schema version this record was written under.
    pub schema_version: u32,
    /// [`crate::graph::WorkflowGraph::structure_hash`] at the time this
    /// context was created.
    pub graph_hash: String,
    /// The execution context itself.
    pub context: ExecutionContext,
}

/// Failures from a [`ContextStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite database returned an error.
    #[error("store backend error: {0}")]
    Backend(String),
    /// The persisted record could not be deserialized.
    #[error("failed to deserialize persisted context: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Durable persistence for execution contexts.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Persist (insert or overwrite) a context, along with the graph hash
    /// it was created against.
    async fn save(&self, graph_hash: &str, ctx: &ExecutionContext) -> Result<(), StoreError>;

    /// Load a previously persisted context by execution id.
    async fn load(&self, execution_id: &str) -> Result<Option<PersistedContext>, StoreError>;

    /// List every execution id with a persisted context.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}
