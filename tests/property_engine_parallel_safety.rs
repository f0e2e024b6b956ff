//! Property: running the same acyclic-by-construction graph under bounded
//! concurrency always lands on `Completed` with every node `Completed`,
//! regardless of how many workers were allowed to race.

use std::sync::Arc;

use dagflow::context::{ExecutionStatus, NodeStatus};
use dagflow::executor::test_support::ConstExecutor;
use dagflow::store::memory::InMemoryContextStore;
use dagflow::{DagExecutor, ExecutorConfig, Node, NodeExecutor, WorkflowGraph};
use proptest::prelude::*;

fn build_graph(size: usize, seed: u64) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    for i in 0..size {
        let id = format!("n{i}");
        let executor: Arc<dyn NodeExecutor> = Arc::new(ConstExecutor::default());
        let mut node = Node::custom(id, executor);
        if i > 0 {
            let dep_count = 1 + ((seed as usize + i) % i.min(3));
            for d in 0..dep_count {
                let dep_index = (seed as usize + i * 7 + d) % i;
                node = node.depends_on(format!("n{dep_index}"));
            }
        }
        graph.add_node(node).unwrap();
    }
    graph
}

proptest! {
    #[test]
    fn prop_completes_regardless_of_concurrency_bound(
        size in 1usize..15,
        seed in 0u64..1000,
        max_concurrency in 1usize..8,
    ) {
        let graph = build_graph(size, seed);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async {
            let store = Arc::new(InMemoryContextStore::new());
            let config = ExecutorConfig { max_concurrency: Some(max_concurrency), ..ExecutorConfig::default() };
            let engine = DagExecutor::new(store, config);
            engine.execute(&graph, serde_json::Value::Null, None).await.unwrap()
        });

        prop_assert_eq!(ctx.status, ExecutionStatus::Completed);
        for i in 0..size {
            let id = format!("n{i}");
            prop_assert_eq!(ctx.node_states[&id].status, NodeStatus::Completed);
        }
    }
}
