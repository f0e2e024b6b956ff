//! S6 (pause & resume): A -> B -> C. Pausing mid-way through A leaves B
//! undispatched; a later `execute` call against the same `execution_id`
//! picks up where the run left off and completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dagflow::context::{ExecutionStatus, NodeStatus};
use dagflow::events::{CollectingHandler, EventKind};
use dagflow::executor::test_support::ConstExecutor;
use dagflow::executor::{NodeEnvelope, NodeExecutorError, NodeOutput};
use dagflow::store::memory::InMemoryContextStore;
use dagflow::{DagExecutor, ExecutorConfig, Node, NodeExecutor, WorkflowGraph};

struct SlowExecutor {
    delay: Duration,
}

#[async_trait]
impl NodeExecutor for SlowExecutor {
    async fn execute(&self, _envelope: NodeEnvelope) -> Result<NodeOutput, NodeExecutorError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeOutput::default())
    }
}

fn exec() -> Arc<dyn NodeExecutor> {
    Arc::new(ConstExecutor::default())
}

fn graph() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    graph.add_node(Node::custom("a", Arc::new(SlowExecutor { delay: Duration::from_millis(200) }))).unwrap();
    graph.add_node(Node::custom("b", exec()).depends_on("a")).unwrap();
    graph.add_node(Node::custom("c", exec()).depends_on("b")).unwrap();
    graph
}

#[tokio::test]
async fn pausing_mid_run_stops_before_b_and_resume_completes() {
    let store = Arc::new(InMemoryContextStore::new());
    let handler = Arc::new(CollectingHandler::new());
    let engine =
        Arc::new(DagExecutor::new(store.clone(), ExecutorConfig::default()).on_event(handler.clone()));

    let graph = graph();
    let run_engine = engine.clone();
    let run_graph = graph.clone();
    let run = tokio::spawn(async move { run_engine.execute(&run_graph, serde_json::Value::Null, None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.pause();

    let ctx = run.await.unwrap().unwrap();
    assert_eq!(ctx.status, ExecutionStatus::Paused);
    assert_eq!(ctx.node_states["a"].status, NodeStatus::Completed);
    assert_eq!(ctx.node_states["b"].status, NodeStatus::Pending);

    let b_started = handler
        .events()
        .into_iter()
        .any(|e| matches!(e.kind, EventKind::NodeStarted { node_id, .. } if node_id == "b"));
    assert!(!b_started);

    let resumed_store = store;
    let resumed_handler = Arc::new(CollectingHandler::new());
    let resumed_engine =
        DagExecutor::new(resumed_store, ExecutorConfig::default()).on_event(resumed_handler.clone());
    let final_ctx = resumed_engine
        .execute(&graph, serde_json::Value::Null, Some(&ctx.execution_id))
        .await
        .unwrap();

    assert_eq!(final_ctx.status, ExecutionStatus::Completed);
    for id in ["a", "b", "c"] {
        assert_eq!(final_ctx.node_states[id].status, NodeStatus::Completed);
    }
}
