//! Property: a graph built so every dependency points at an
//! already-added, lower-indexed node can never contain a cycle.

use std::sync::Arc;

use dagflow::executor::test_support::ConstExecutor;
use dagflow::{Node, NodeExecutor, WorkflowGraph};
use proptest::prelude::*;

fn exec() -> Arc<dyn NodeExecutor> {
    Arc::new(ConstExecutor::default())
}

proptest! {
    #[test]
    fn prop_acyclic_by_construction_has_no_cycle_issues(
        size in 1usize..30,
        seed in 0u64..1000,
    ) {
        let mut graph = WorkflowGraph::new();
        for i in 0..size {
            let id = format!("n{i}");
            let mut node = Node::custom(id, exec());
            if i > 0 {
                let dep_count = 1 + ((seed as usize + i) % i.min(3));
                for d in 0..dep_count {
                    let dep_index = (seed as usize + i * 7 + d) % i;
                    node = node.depends_on(format!("n{dep_index}"));
                }
            }
            graph.add_node(node).unwrap();
        }

        let issues = graph.validate();
        prop_assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        prop_assert!(graph.topological_layers().is_ok());
    }
}
