//! In-memory context store, used when `enable_context_persistence = false`
//! and in unit/integration tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ContextStore, PersistedContext, StoreError, SCHEMA_VERSION};
use crate::context::ExecutionContext;

/// An in-process [`ContextStore`] backed by a `RwLock<HashMap<...>>`.
#[derive(Default)]
pub struct InMemoryContextStore {
    records: RwLock<HashMap<String, PersistedContext>>,
}

impl InMemoryContextStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save(&self, graph_hash: &str, ctx: &ExecutionContext) -> Result<(), StoreError> {
        let record = PersistedContext {
            schema_version: SCHEMA_VERSION,
            graph_hash: graph_hash.to_string(),
            context: ctx.clone(),
        };
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        records.insert(ctx.execution_id.clone(), record);
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<PersistedContext>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        Ok(records.get(execution_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        Ok(records.keys().cloned().collect())
    }
}
