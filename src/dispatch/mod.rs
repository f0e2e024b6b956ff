//! Dual-mode dispatcher: selects an execution strategy from feature flags
//! at construction time.

use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::engine::{DagExecutor, ExecutorConfig};
use crate::error::{EngineError, EngineResult};
use crate::events::EventHandler;
use crate::graph::{Node, WorkflowGraph};
use crate::policy::PolicyEngine;
use crate::store::ContextStore;

/// Feature flags selecting the dispatcher's execution mode, loaded via
/// `figment` the way `ConfigLoader::load` merges defaults, a YAML file,
/// and environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherFlags {
    /// Use a real DAG executor rather than the inert legacy sequential
    /// runner.
    #[serde(default)]
    pub enable_dag_execution: bool,
    /// When `enable_dag_execution` is set, allow more than one node to run
    /// at a time.
    #[serde(default)]
    pub enable_parallel_execution: bool,
    /// Persist execution contexts to the configured store.
    #[serde(default = "default_true")]
    pub enable_context_persistence: bool,
    /// Fan events out to registered handlers.
    #[serde(default = "default_true")]
    pub enable_execution_events: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DispatcherFlags {
    fn default() -> Self {
        Self {
            enable_dag_execution: false,
            enable_parallel_execution: false,
            enable_context_persistence: true,
            enable_execution_events: true,
        }
    }
}

impl DispatcherFlags {
    /// Load flags by merging built-in defaults, an optional YAML file, and
    /// `DAGFLOW_`-prefixed environment variables, in that order.
    pub fn load(yaml_path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        Figment::new()
            .merge(Serialized::defaults(DispatcherFlags::default()))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed("DAGFLOW_").split("__"))
            .extract()
            .map_err(|e| EngineError::Validation(format!("failed to load dispatcher flags: {e}")))
    }
}

/// The execution strategy a [`WorkflowDispatcher`] delegates to.
enum Mode<S: ContextStore> {
    /// A trivial in-order runner with no retry, policy evaluation, or
    /// persistence — satisfies the "inert when DAG execution is disabled"
    /// requirement.
    LegacySequential,
    /// `DagExecutor` pinned to a concurrency cap of 1.
    DagLinear(DagExecutor<S>),
    /// `DagExecutor` with the configured concurrency cap.
    DagParallel(DagExecutor<S>),
}

/// Picks and drives one of the three execution strategies based on
/// [`DispatcherFlags`].
pub struct WorkflowDispatcher<S: ContextStore> {
    mode: Mode<S>,
}

impl<S: ContextStore> WorkflowDispatcher<S> {
    /// Build a dispatcher for the given flags, store, optional policy
    /// engine, and event handlers.
    pub fn new(
        flags: &DispatcherFlags,
        store: Arc<S>,
        policy: Option<Arc<PolicyEngine>>,
        handlers: Vec<Arc<dyn EventHandler>>,
        max_concurrency: Option<usize>,
    ) -> Self {
        let mode = if !flags.enable_dag_execution {
            Mode::LegacySequential
        } else {
            let cap = if flags.enable_parallel_execution {
                max_concurrency.or_else(|| Some(num_cpus::get()))
            } else {
                Some(1)
            };
            let config = ExecutorConfig { max_concurrency: cap, ..ExecutorConfig::default() };
            let mut executor = DagExecutor::new(store, config);
            if let Some(policy) = policy {
                executor = executor.with_policy_engine(policy);
            }
            if flags.enable_execution_events {
                for handler in handlers {
                    executor = executor.on_event(handler);
                }
            }
            if flags.enable_parallel_execution {
                Mode::DagParallel(executor)
            } else {
                Mode::DagLinear(executor)
            }
        };
        Self { mode }
    }

    /// Run the graph under the selected mode.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        global_input: Value,
        execution_id: Option<&str>,
    ) -> EngineResult<ExecutionContext> {
        match &self.mode {
            Mode::LegacySequential => run_legacy_sequential(graph, global_input).await,
            Mode::DagLinear(executor) | Mode::DagParallel(executor) => {
                executor.execute(graph, global_input, execution_id).await
            }
        }
    }
}

/// A minimal in-order runner used when DAG execution is disabled: dispatch
/// nodes strictly by insertion order, with no retry, no policy evaluation,
/// and no persistence. Exists to keep the dispatcher usable as a drop-in
/// even with the feature flag off, not as a production execution path.
async fn run_legacy_sequential(graph: &WorkflowGraph, global_input: Value) -> EngineResult<ExecutionContext> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let mut ctx = ExecutionContext::new(
        execution_id,
        graph.structure_hash(),
        global_input,
        graph.iter().map(|n: &Node| n.id.clone()),
        chrono::Utc::now(),
    );

    for node in graph.iter() {
        let now = chrono::Utc::now();
        let state = ctx.node_states.get_mut(&node.id).expect("node present");
        state.mark_ready().map_err(|e| EngineError::Internal(e.to_string()))?;
        state.mark_running(now).map_err(|e| EngineError::Internal(e.to_string()))?;

        let Some(executor) = &node.executor else {
            let output = crate::executor::NodeOutput::default();
            state.mark_completed(now, output).map_err(|e| EngineError::Internal(e.to_string()))?;
            continue;
        };

        let envelope = crate::executor::NodeEnvelope {
            dependency_outputs: Default::default(),
            dependency_artifacts: Default::default(),
            global_context: ctx.global_input.clone(),
            all_outputs: Default::default(),
            node_id: node.id.clone(),
            attempt: 1,
            cancellation: tokio_util::sync::CancellationToken::new(),
        };
        let result = tokio::time::timeout(Duration::from_secs(300), executor.execute(envelope)).await;
        let state = ctx.node_states.get_mut(&node.id).expect("node present");
        match result {
            Ok(Ok(output)) => {
                state.mark_completed(now, output).map_err(|e| EngineError::Internal(e.to_string()))?;
            }
            Ok(Err(_)) | Err(_) => {
                state
                    .mark_failed(now, crate::error::NodeError::Fatal { message: "legacy runner failure".to_string() })
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                break;
            }
        }
    }

    ctx.status =
        if ctx.any_node_failed() { crate::context::ExecutionStatus::Failed } else { crate::context::ExecutionStatus::Completed };
    Ok(ctx)
}
