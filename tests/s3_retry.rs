//! S3 (retry on transient): single node, exponential backoff, fails twice
//! then succeeds. Total elapsed must be at least base_delay * (1 + 2) = 3s.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dagflow::context::{ExecutionStatus, NodeStatus};
use dagflow::events::{CollectingHandler, EventKind};
use dagflow::executor::test_support::FlakyExecutor;
use dagflow::store::memory::InMemoryContextStore;
use dagflow::{BackoffKind, DagExecutor, ExecutorConfig, Node, NodeExecutor, RetryPolicy, WorkflowGraph};

#[tokio::test]
async fn transient_failures_retry_with_exponential_backoff() {
    let mut graph = WorkflowGraph::new();
    let flaky: Arc<dyn NodeExecutor> = Arc::new(FlakyExecutor::new(2));
    graph
        .add_node(Node::custom("a", flaky).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: BackoffKind::Exponential,
        }))
        .unwrap();

    let store = Arc::new(InMemoryContextStore::new());
    let handler = Arc::new(CollectingHandler::new());
    let engine = DagExecutor::new(store, ExecutorConfig::default()).on_event(handler.clone());

    let start = Instant::now();
    let ctx = engine.execute(&graph, serde_json::Value::Null, None).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(ctx.status, ExecutionStatus::Completed);
    assert_eq!(ctx.node_states["a"].status, NodeStatus::Completed);
    assert_eq!(ctx.node_states["a"].attempts, 3);
    assert!(elapsed >= Duration::from_secs(3), "elapsed was {elapsed:?}");

    let kinds: Vec<EventKind> = handler.events().into_iter().map(|e| e.kind).collect();
    let started_attempts: Vec<u32> = kinds
        .iter()
        .filter_map(|k| match k {
            EventKind::NodeStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(started_attempts, vec![1, 2, 3]);

    let retry_delays: Vec<f64> = kinds
        .iter()
        .filter_map(|k| match k {
            EventKind::NodeRetry { delay_seconds, .. } => Some(*delay_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(retry_delays.len(), 2);
    assert!((retry_delays[0] - 1.0).abs() < 0.01);
    assert!((retry_delays[1] - 2.0).abs() < 0.01);
}
