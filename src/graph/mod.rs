//! Workflow graph: node definitions, validation, and scheduling queries.
//!
//! Nodes are kept in an insertion-ordered map so ready-set and topological
//! iteration are deterministic tie-breaks on add order, not hash order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::executor::NodeExecutor;
use crate::policy::expr::Expr;

/// The kind of work a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A phase node: corresponds to an SDLC stage and is subject to gate
    /// evaluation via its `phase_id`.
    Phase,
    /// A node whose execution is gated purely by its `condition`.
    Conditional,
    /// A node that exists only to evaluate a quality gate, with no
    /// executor-side artifact production of its own.
    Gate,
    /// Any other user-defined unit of work.
    Custom,
}

impl NodeKind {
    /// Whether this kind requires a real executor to be attached.
    fn requires_executor(self) -> bool {
        matches!(self, NodeKind::Phase | NodeKind::Custom)
    }
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffKind {
    /// No delay between attempts.
    #[default]
    None,
    /// `base_delay * 2^(attempt-1)`.
    Exponential,
}

/// Per-node retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Always `>= 1`.
    pub max_attempts: u32,
    /// Base delay used by the backoff formula.
    pub base_delay: Duration,
    /// Backoff strategy.
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(0),
            backoff: BackoffKind::None,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before the given (1-indexed) attempt number.
    ///
    /// `attempt` is the attempt that just failed; the delay precedes the
    /// *next* attempt, so `delay_before(1)` is the wait before attempt 2.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::None => Duration::from_secs(0),
            BackoffKind::Exponential => {
                let exp = attempt.saturating_sub(1);
                self.base_delay.saturating_mul(2u32.saturating_pow(exp))
            }
        }
    }
}

/// An immutable node definition within a [`WorkflowGraph`].
#[derive(Clone)]
pub struct Node {
    /// Unique id within the workflow.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What kind of node this is.
    pub kind: NodeKind,
    /// Phase id used to resolve an SLO. Only meaningful for `Phase` nodes.
    pub phase_id: Option<String>,
    /// The executor invoked on dispatch. `None` is only valid for
    /// `Conditional`/`Gate` kinds that perform no work of their own.
    pub executor: Option<Arc<dyn NodeExecutor>>,
    /// Ids of nodes this node depends on.
    pub dependencies: BTreeSet<String>,
    /// Optional boolean expression over the current outputs map; when
    /// present, the node only runs if it evaluates true.
    pub condition: Option<Expr>,
    /// Retry policy applied to executor (not policy-gate) failures.
    pub retry_policy: RetryPolicy,
    /// Optional per-node timeout.
    pub timeout: Option<Duration>,
}

impl Node {
    /// Start building a `Phase` node bound to an executor.
    #[must_use]
    pub fn phase(id: impl Into<String>, phase_id: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind: NodeKind::Phase,
            phase_id: Some(phase_id.into()),
            executor: Some(executor),
            dependencies: BTreeSet::new(),
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Start building a `Custom` node bound to an executor, with no phase
    /// SLO resolution.
    #[must_use]
    pub fn custom(id: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind: NodeKind::Custom,
            phase_id: None,
            executor: Some(executor),
            dependencies: BTreeSet::new(),
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Set the human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a dependency edge `dep -> self`.
    #[must_use]
    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Attach a condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set a per-node timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A single issue surfaced by [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    /// A node depends on an id that does not exist in the graph.
    MissingDependency {
        /// The node with the dangling dependency.
        node_id: String,
        /// The missing dependency id.
        dependency_id: String,
    },
    /// A cycle was detected; the member list is one representative cycle.
    Cycle(Vec<String>),
    /// A node lists itself as a dependency.
    SelfDependency(String),
}

/// Errors returned by graph construction and scheduling queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// `add_node` was called with an id already present.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    /// `add_node` was called with a node missing a required executor.
    #[error("node {0} requires an executor for its kind")]
    InvalidNode(String),
    /// A scheduling query was attempted on a graph that fails validation.
    #[error("graph failed validation: {0:?}")]
    Invalid(Vec<GraphIssue>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// An in-memory directed acyclic graph of [`Node`]s, keyed by id in
/// insertion order.
#[derive(Clone, Default)]
pub struct WorkflowGraph {
    nodes: IndexMap<String, Node>,
}

impl WorkflowGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: IndexMap::new() }
    }

    /// Add a node. Fails with `DuplicateNodeId`/`InvalidNode`.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNodeId(node.id));
        }
        if node.kind.requires_executor() && node.executor.is_none() {
            return Err(GraphError::InvalidNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Look up a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Iterate nodes in insertion (`add_node`) order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validate the graph: dependency existence, self-dependency, and
    /// cycles (three-color DFS).
    #[must_use]
    pub fn validate(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();

        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if dep == &node.id {
                    issues.push(GraphIssue::SelfDependency(node.id.clone()));
                } else if !self.nodes.contains_key(dep) {
                    issues.push(GraphIssue::MissingDependency {
                        node_id: node.id.clone(),
                        dependency_id: dep.clone(),
                    });
                }
            }
        }

        if issues.iter().any(|i| matches!(i, GraphIssue::MissingDependency { .. })) {
            // Cycle detection assumes a closed dependency set; skip it when
            // dependencies dangle to avoid reporting a spurious cycle.
            return issues;
        }

        let mut colors: std::collections::HashMap<&str, Color> =
            self.nodes.keys().map(|k| (k.as_str(), Color::White)) .collect();

        for id in self.nodes.keys() {
            if colors[id.as_str()] == Color::White {
                let mut path = Vec::new();
                if let Some(cycle) = self.dfs_cycle(id, &mut colors, &mut path) {
                    issues.push(GraphIssue::Cycle(cycle));
                    break;
                }
            }
        }

        issues
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        colors: &mut std::collections::HashMap<&'a str, Color>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        colors.insert(id, Color::Gray);
        path.push(id.to_string());

        if let Some(node) = self.nodes.get(id) {
            for dep in &node.dependencies {
                match colors.get(dep.as_str()) {
                    Some(Color::Gray) => {
                        let start = path.iter().position(|n| n == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    _ => {
                        if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        colors.insert(id, Color::Black);
        None
    }

    /// Partition nodes into topological layers: layer `k` contains exactly
    /// the nodes whose dependencies are all in layers `< k`.
    pub fn topological_layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let issues = self.validate();
        if !issues.is_empty() {
            return Err(GraphError::Invalid(issues));
        }

        let mut layers = Vec::new();
        let mut placed: BTreeSet<String> = BTreeSet::new();

        while placed.len() < self.nodes.len() {
            let layer: Vec<String> = self
                .nodes
                .values()
                .filter(|n| !placed.contains(&n.id))
                .filter(|n| n.dependencies.iter().all(|d| placed.contains(d)))
                .map(|n| n.id.clone())
                .collect();

            if layer.is_empty() {
                // Unreachable given the validate() guard above, but kept as
                // a defensive invariant check rather than an infinite loop.
                return Err(GraphError::Invalid(vec![GraphIssue::Cycle(vec![])]));
            }

            for id in &layer {
                placed.insert(id.clone());
            }
            layers.push(layer);
        }

        Ok(layers)
    }

    /// The set of node ids that are `pending` (per the supplied set of
    /// already-known non-pending ids) and whose dependencies are all in
    /// `terminal`. Iterates in insertion order so callers get a
    /// deterministic tie-break.
    #[must_use]
    pub fn ready_set(&self, terminal: &BTreeSet<String>, pending: &BTreeSet<String>) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| pending.contains(&n.id))
            .filter(|n| n.dependencies.iter().all(|d| terminal.contains(d)))
            .map(|n| n.id.clone())
            .collect()
    }

    /// A stable hash of the graph's structure (node ids and dependency
    /// edges), used to detect a resume against a mismatched graph.
    #[must_use]
    pub fn structure_hash(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for node in self.nodes.values() {
            node.id.hash(&mut hasher);
            for dep in &node.dependencies {
                dep.hash(&mut hasher);
            }
        }
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::ConstExecutor;

    fn exec() -> Arc<dyn NodeExecutor> {
        Arc::new(ConstExecutor::default())
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("a", exec())).unwrap();
        let err = g.add_node(Node::custom("a", exec())).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNodeId("a".into()));
    }

    #[test]
    fn validate_reports_missing_dependency() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("a", exec()).depends_on("ghost")).unwrap();
        let issues = g.validate();
        assert_eq!(
            issues,
            vec![GraphIssue::MissingDependency {
                node_id: "a".into(),
                dependency_id: "ghost".into()
            }]
        );
    }

    #[test]
    fn validate_reports_self_dependency() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("a", exec()).depends_on("a")).unwrap();
        let issues = g.validate();
        assert_eq!(issues, vec![GraphIssue::SelfDependency("a".into())]);
    }

    #[test]
    fn validate_detects_cycle() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("a", exec()).depends_on("c")).unwrap();
        g.add_node(Node::custom("b", exec()).depends_on("a")).unwrap();
        g.add_node(Node::custom("c", exec()).depends_on("b")).unwrap();
        let issues = g.validate();
        assert!(issues.iter().any(|i| matches!(i, GraphIssue::Cycle(_))));
        assert!(g.topological_layers().is_err());
    }

    #[test]
    fn topological_layers_groups_independent_nodes() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("a", exec())).unwrap();
        g.add_node(Node::custom("b", exec())).unwrap();
        g.add_node(Node::custom("c", exec()).depends_on("a").depends_on("b")).unwrap();
        g.add_node(Node::custom("d", exec()).depends_on("c")).unwrap();

        let layers = g.topological_layers().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].len(), 2);
        assert_eq!(layers[1], vec!["c".to_string()]);
        assert_eq!(layers[2], vec!["d".to_string()]);
    }

    #[test]
    fn ready_set_respects_insertion_order() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::custom("b", exec())).unwrap();
        g.add_node(Node::custom("a", exec())).unwrap();

        let terminal = BTreeSet::new();
        let pending: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let ready = g.ready_set(&terminal, &pending);
        assert_eq!(ready, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn structure_hash_is_stable_and_order_independent_between_equal_graphs() {
        let mut g1 = WorkflowGraph::new();
        g1.add_node(Node::custom("a", exec())).unwrap();
        g1.add_node(Node::custom("b", exec()).depends_on("a")).unwrap();

        let mut g2 = WorkflowGraph::new();
        g2.add_node(Node::custom("a", exec())).unwrap();
        g2.add_node(Node::custom("b", exec()).depends_on("a")).unwrap();

        assert_eq!(g1.structure_hash(), g2.structure_hash());
    }

    #[test]
    fn structure_hash_changes_when_edges_change() {
        let mut g1 = WorkflowGraph::new();
        g1.add_node(Node::custom("a", exec())).unwrap();
        g1.add_node(Node::custom("b", exec())).unwrap();

        let mut g2 = WorkflowGraph::new();
        g2.add_node(Node::custom("a", exec())).unwrap();
        g2.add_node(Node::custom("b", exec()).depends_on("a")).unwrap();

        assert_ne!(g1.structure_hash(), g2.structure_hash());
    }
}
