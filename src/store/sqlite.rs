//! SQLite-backed context store: a single table holding a JSON-serialized
//! blob per execution, keyed by execution id.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::{ContextStore, PersistedContext, StoreError, SCHEMA_VERSION};
use crate::context::ExecutionContext;

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS execution_contexts (
    execution_id TEXT PRIMARY KEY,
    schema_version INTEGER NOT NULL,
    graph_hash TEXT NOT NULL,
    context_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// A [`ContextStore`] backed by a SQLite database file (or `:memory:`).
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Connect to `database_url` (e.g. `sqlite://dagflow.db`) and ensure
    /// the backing table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query(MIGRATION).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn save(&self, graph_hash: &str, ctx: &ExecutionContext) -> Result<(), StoreError> {
        let context_json = serde_json::to_string(ctx)?;
        sqlx::query(
            r"
            INSERT INTO execution_contexts (execution_id, schema_version, graph_hash, context_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(execution_id) DO UPDATE SET
                schema_version = excluded.schema_version,
                graph_hash = excluded.graph_hash,
                context_json = excluded.context_json,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&ctx.execution_id)
        .bind(SCHEMA_VERSION)
        .bind(graph_hash)
        .bind(context_json)
        .bind(ctx.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<PersistedContext>, StoreError> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT schema_version, graph_hash, context_json FROM execution_contexts WHERE execution_id = ?1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((schema_version, graph_hash, context_json)) = row else {
            return Ok(None);
        };
        let context: ExecutionContext = serde_json::from_str(&context_json)?;
        Ok(Some(PersistedContext {
            schema_version: u32::try_from(schema_version).unwrap_or(0),
            graph_hash,
            context,
        }))
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT execution_id FROM execution_contexts").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    async fn store() -> SqliteContextStore {
        SqliteContextStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = store().await;
        let ctx = ExecutionContext::new("exec-1", "wf-1", Value::Null, vec!["a".to_string()], Utc::now());
        store.save("hash-1", &ctx).await.unwrap();
        let loaded = store.load("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.graph_hash, "hash-1");
        assert_eq!(loaded.context.execution_id, "exec-1");
    }

    #[tokio::test]
    async fn save_overwrites_existing_record() {
        let store = store().await;
        let mut ctx = ExecutionContext::new("exec-1", "wf-1", Value::Null, vec!["a".to_string()], Utc::now());
        store.save("hash-1", &ctx).await.unwrap();
        ctx.status = crate::context::ExecutionStatus::Completed;
        store.save("hash-2", &ctx).await.unwrap();

        let loaded = store.load("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.graph_hash, "hash-2");
        assert_eq!(loaded.context.status, crate::context::ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn list_returns_saved_ids() {
        let store = store().await;
        store
            .save("h1", &ExecutionContext::new("exec-1", "wf-1", Value::Null, vec![], Utc::now()))
            .await
            .unwrap();
        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec!["exec-1".to_string()]);
    }
}
