//! S5 (policy block): a phase node whose metrics fail a BLOCKING gate ends
//! up `failed` with a `PolicyViolation`, even though the executor itself
//! succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use dagflow::context::{ExecutionStatus, NodeStatus};
use dagflow::error::NodeError;
use dagflow::events::{CollectingHandler, EventKind};
use dagflow::executor::test_support::ConstExecutor;
use dagflow::policy::expr::Expr;
use dagflow::policy::{Gate, PhaseSlo, PolicyEngine, Severity};
use dagflow::store::memory::InMemoryContextStore;
use dagflow::{DagExecutor, ExecutorConfig, Node, NodeExecutor, WorkflowGraph};

fn backend_output() -> serde_json::Map<String, serde_json::Value> {
    let mut m = serde_json::Map::new();
    m.insert("code_quality_score".to_string(), serde_json::json!(7.0));
    m.insert("test_coverage".to_string(), serde_json::json!(0.85));
    m.insert("security_vulnerabilities".to_string(), serde_json::json!(0));
    m.insert("build_success_rate".to_string(), serde_json::json!(0.98));
    m.insert("security_scan_complete".to_string(), serde_json::json!(1.0));
    m
}

#[tokio::test]
async fn failing_blocking_gate_overrides_node_to_failed() {
    let executor: Arc<dyn NodeExecutor> = Arc::new(ConstExecutor { output: backend_output() });
    let mut graph = WorkflowGraph::new();
    graph.add_node(Node::phase("build", "backend", executor)).unwrap();

    let mut phases = HashMap::new();
    phases.insert(
        "backend".to_string(),
        PhaseSlo {
            phase_id: "backend".to_string(),
            gates: vec![Gate {
                name: "quality_threshold".to_string(),
                expression: Expr::parse("code_quality_score >= 8.0 AND test_coverage >= 0.80").unwrap(),
                severity: Severity::Blocking,
                required_metrics: vec!["code_quality_score".to_string(), "test_coverage".to_string()],
            }],
        },
    );
    let policy = Arc::new(PolicyEngine::new(phases));

    let store = Arc::new(InMemoryContextStore::new());
    let handler = Arc::new(CollectingHandler::new());
    let engine = DagExecutor::new(store, ExecutorConfig::default())
        .with_policy_engine(policy)
        .on_event(handler.clone());

    let ctx = engine.execute(&graph, serde_json::Value::Null, None).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Failed);
    assert_eq!(ctx.node_states["build"].status, NodeStatus::Failed);
    assert!(matches!(
        ctx.node_states["build"].error,
        Some(NodeError::PolicyViolation { .. })
    ));

    let events = handler.events();
    let completed_idx = events.iter().position(|e| matches!(e.kind, EventKind::NodeCompleted { .. })).unwrap();
    let evaluated_idx = events.iter().position(|e| matches!(e.kind, EventKind::PolicyEvaluated { .. })).unwrap();
    let blocked_idx = events.iter().position(|e| matches!(e.kind, EventKind::PolicyBlocked { .. })).unwrap();
    assert!(completed_idx < evaluated_idx);
    assert!(evaluated_idx < blocked_idx);
}
