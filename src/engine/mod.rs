//! The DAG executor: the scheduling loop that drives a [`WorkflowGraph`]
//! to completion.
//!
//! Rather than executing one topological layer at a time as a barrier,
//! the loop keeps a continuous ready set: a finishing node can unblock a
//! downstream node without waiting on its layer-mates, using
//! `futures::stream::FuturesUnordered` to await at least one outstanding
//! task at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{ExecutionContext, ExecutionStatus, NodeStatus};
use crate::error::{EngineError, EngineResult, NodeError};
use crate::events::{dispatch as dispatch_event, Event, EventHandler, EventKind};
use crate::executor::{NodeEnvelope, NodeExecutorError, NodeOutput};
use crate::graph::{Node, WorkflowGraph};
use crate::policy::PolicyEngine;
use crate::store::ContextStore;

/// Tunables shared by every execution this [`DagExecutor`] drives.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on simultaneously running nodes. `None` means bounded
    /// only by the size of the current ready set.
    pub max_concurrency: Option<usize>,
    /// Whether a permanently failed (or policy-blocked) node trips
    /// cancellation of the rest of the run. Defaults to `true`.
    pub fail_fast: bool,
    /// Timeout applied to a node with no timeout of its own.
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_concurrency: None, fail_fast: true, default_timeout: None }
    }
}

fn numeric_metrics(ctx: &ExecutionContext) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    for value in ctx.outputs.values() {
        if let Value::Object(map) = value {
            for (k, v) in map {
                if let Some(n) = v.as_f64() {
                    metrics.insert(k.clone(), n);
                } else if let Some(b) = v.as_bool() {
                    metrics.insert(k.clone(), if b { 1.0 } else { 0.0 });
                }
            }
        }
    }
    metrics
}

type TaskOutcome = (String, u32, Result<NodeOutput, NodeExecutorError>);

/// Drives a [`WorkflowGraph`] to completion against a [`ContextStore`].
pub struct DagExecutor<S: ContextStore> {
    store: Arc<S>,
    policy: Option<Arc<PolicyEngine>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    fail_fast_tripped: AtomicBool,
    paused: Arc<AtomicBool>,
    save_lock: Mutex<()>,
}

impl<S: ContextStore> DagExecutor<S> {
    /// Build an executor backed by the given store.
    pub fn new(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self {
            store,
            policy: None,
            handlers: Vec::new(),
            config,
            cancel: CancellationToken::new(),
            fail_fast_tripped: AtomicBool::new(false),
            paused: Arc::new(AtomicBool::new(false)),
            save_lock: Mutex::new(()),
        }
    }

    /// Attach a policy engine; phase nodes are gated against it on
    /// completion.
    #[must_use]
    pub fn with_policy_engine(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register an event handler. Handlers are invoked synchronously, in
    /// registration order, on the scheduler task.
    #[must_use]
    pub fn on_event(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Stop dispatching new nodes once the in-flight set drains. Idempotent;
    /// has no effect once `cancel()` has been called.
    pub fn pause(&self) {
        if !self.cancel.is_cancelled() {
            self.paused.store(true, Ordering::SeqCst);
        }
    }

    /// Clear a prior `pause()`, allowing dispatch to resume.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Trip cancellation unconditionally. Unlike `pause`, takes effect
    /// immediately: the scheduling loop stops on its next check without
    /// waiting for in-flight nodes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether `cancel()` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether `pause()` is currently in effect.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Trip the same `CancellationToken` a user `cancel()` would, but mark
    /// it as an internal fail-fast trip so the scheduling loop finishes
    /// with `Failed` rather than `Cancelled`.
    fn trip_fail_fast(&self) {
        self.fail_fast_tripped.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn emit(&self, ctx: &ExecutionContext, kind: EventKind) {
        if self.handlers.is_empty() {
            return;
        }
        let event = Event { execution_id: ctx.execution_id.clone(), emitted_at: Utc::now(), kind };
        dispatch_event(&self.handlers, &event);
    }

    async fn persist(&self, graph_hash: &str, ctx: &ExecutionContext) -> EngineResult<()> {
        let _guard = self.save_lock.lock().await;
        self.store.save(graph_hash, ctx).await?;
        Ok(())
    }

    async fn load_or_init(
        &self,
        execution_id: &str,
        graph: &WorkflowGraph,
        graph_hash: &str,
        global_input: Value,
    ) -> EngineResult<ExecutionContext> {
        match self.store.load(execution_id).await? {
            Some(persisted) => {
                if persisted.graph_hash != graph_hash {
                    return Err(EngineError::WorkflowMismatch {
                        expected_hash: persisted.graph_hash,
                        found_hash: graph_hash.to_string(),
                    });
                }
                if persisted.context.status == ExecutionStatus::Cancelled {
                    return Err(EngineError::Validation("cannot resume a cancelled execution".to_string()));
                }
                let mut ctx = persisted.context;
                for state in ctx.node_states.values_mut() {
                    if state.status == NodeStatus::Running {
                        state.status = NodeStatus::Ready;
                    }
                }
                ctx.status = ExecutionStatus::Running;
                Ok(ctx)
            }
            None => Ok(ExecutionContext::new(
                execution_id.to_string(),
                graph_hash.to_string(),
                global_input,
                graph.iter().map(|n| n.id.clone()),
                Utc::now(),
            )),
        }
    }

    /// Finalize a node's successful completion: records output/artifacts,
    /// emits `NodeCompleted`, and — for phase nodes with a resolvable SLO —
    /// evaluates quality gates, possibly overwriting the node to `Failed`
    /// with `PolicyViolation` and tripping fail-fast cancellation.
    fn complete_node(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        attempt: u32,
        output: NodeOutput,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let output_keys: Vec<String> = output.output.keys().cloned().collect();
        let artifact_count = output.artifacts.len();
        let output_map = output.output.clone();
        let artifacts = output.artifacts.clone();

        {
            let state = ctx
                .node_states
                .get_mut(&node.id)
                .ok_or_else(|| EngineError::Internal(format!("unknown node {}", node.id)))?;
            state.mark_completed(now, output)?;
        }
        ctx.record_output(&node.id, &output_map, &artifacts, now);
        self.emit(ctx, EventKind::NodeCompleted { node_id: node.id.clone(), attempt, output_keys, artifact_count });

        if let (Some(policy), Some(phase_id)) = (&self.policy, &node.phase_id) {
            if let Some(slo) = policy.resolve(phase_id) {
                let metrics = numeric_metrics(ctx);
                let verdict = policy.evaluate(slo, &metrics);
                self.emit(
                    ctx,
                    EventKind::PolicyEvaluated {
                        node_id: node.id.clone(),
                        phase_id: phase_id.clone(),
                        gates: verdict.gates.clone(),
                    },
                );
                if verdict.is_blocked() {
                    let failing = verdict.failing_gates();
                    if let Some(state) = ctx.node_states.get_mut(&node.id) {
                        state.status = NodeStatus::Failed;
                        state.error = Some(NodeError::PolicyViolation { failing_gates: failing.clone() });
                        state.finished_at = Some(now);
                    }
                    self.emit(ctx, EventKind::PolicyBlocked { node_id: node.id.clone(), failing_gates: failing });
                    if self.config.fail_fast {
                        self.trip_fail_fast();
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_failure(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        retry_after: &mut HashMap<String, Instant>,
        attempt: u32,
        err: NodeExecutorError,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let (error_kind, message, node_error) = match err {
            NodeExecutorError::Transient(m) => ("transient", m.clone(), NodeError::Transient { message: m }),
            NodeExecutorError::Fatal(m) => ("fatal", m.clone(), NodeError::Fatal { message: m }),
        };
        let retryable = node_error.is_retryable() && attempt < node.retry_policy.max_attempts;

        if retryable {
            let delay = node.retry_policy.delay_before(attempt);
            {
                let state = ctx
                    .node_states
                    .get_mut(&node.id)
                    .ok_or_else(|| EngineError::Internal(format!("unknown node {}", node.id)))?;
                state.mark_retry()?;
            }
            self.emit(
                ctx,
                EventKind::NodeFailed {
                    node_id: node.id.clone(),
                    attempt,
                    error_kind: error_kind.to_string(),
                    error_message: message,
                    will_retry: true,
                },
            );
            self.emit(
                ctx,
                EventKind::NodeRetry {
                    node_id: node.id.clone(),
                    next_attempt: attempt + 1,
                    delay_seconds: delay.as_secs_f64(),
                },
            );
            retry_after.insert(node.id.clone(), Instant::now() + delay);
        } else {
            {
                let state = ctx
                    .node_states
                    .get_mut(&node.id)
                    .ok_or_else(|| EngineError::Internal(format!("unknown node {}", node.id)))?;
                state.mark_failed(now, node_error)?;
            }
            self.emit(
                ctx,
                EventKind::NodeFailed {
                    node_id: node.id.clone(),
                    attempt,
                    error_kind: error_kind.to_string(),
                    error_message: message,
                    will_retry: false,
                },
            );
            if self.config.fail_fast {
                self.trip_fail_fast();
            }
        }
        Ok(())
    }

    /// Drive `graph` to completion, starting fresh or resuming a prior
    /// execution by id.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        global_input: Value,
        execution_id: Option<&str>,
    ) -> EngineResult<ExecutionContext> {
        let issues = graph.validate();
        if !issues.is_empty() {
            return Err(EngineError::Validation(format!("{issues:?}")));
        }
        let graph_hash = graph.structure_hash();

        let mut ctx = match execution_id {
            Some(id) => self.load_or_init(id, graph, &graph_hash, global_input).await?,
            None => {
                let id = Uuid::new_v4().to_string();
                self.load_or_init(&id, graph, &graph_hash, global_input).await?
            }
        };

        self.emit(&ctx, EventKind::WorkflowStarted);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.unwrap_or_else(|| graph.len().max(1))));
        let mut running: FuturesUnordered<tokio::task::JoinHandle<TaskOutcome>> = FuturesUnordered::new();
        let mut retry_after: HashMap<String, Instant> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() {
                if !self.fail_fast_tripped.load(Ordering::SeqCst) {
                    ctx.status = ExecutionStatus::Cancelled;
                }
                break;
            }

            let paused = self.paused.load(Ordering::SeqCst);

            if !paused {
                let terminal: std::collections::BTreeSet<String> = ctx
                    .node_states
                    .iter()
                    .filter(|(_, s)| s.status.is_terminal())
                    .map(|(k, _)| k.clone())
                    .collect();
                let pending: std::collections::BTreeSet<String> = ctx
                    .node_states
                    .iter()
                    .filter(|(_, s)| matches!(s.status, NodeStatus::Pending | NodeStatus::Ready))
                    .map(|(k, _)| k.clone())
                    .collect();

                let now_instant = Instant::now();
                let mut ready_ids = graph.ready_set(&terminal, &pending);
                ready_ids.retain(|id| retry_after.get(id).is_none_or(|t| *t <= now_instant));

                for id in ready_ids {
                    retry_after.remove(&id);
                    let node = graph
                        .get(&id)
                        .ok_or_else(|| EngineError::Internal(format!("ready id {id} missing from graph")))?;

                    let metrics = numeric_metrics(&ctx);
                    let proceeds = match &node.condition {
                        None => true,
                        Some(expr) => expr.eval(&metrics).as_bool(),
                    };

                    let now = Utc::now();
                    let became_ready = {
                        let state = ctx
                            .node_states
                            .get_mut(&id)
                            .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))?;
                        if state.status == NodeStatus::Pending {
                            state.mark_ready()?;
                            true
                        } else {
                            false
                        }
                    };
                    if became_ready {
                        self.emit(&ctx, EventKind::NodeReady { node_id: id.clone() });
                    }

                    if !proceeds {
                        let state = ctx
                            .node_states
                            .get_mut(&id)
                            .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))?;
                        state.mark_skipped(now)?;
                        let reason = node.condition.as_ref().map_or_else(String::new, ToString::to_string);
                        self.emit(&ctx, EventKind::NodeSkipped { node_id: id.clone(), condition_reason: reason });
                        continue;
                    }

                    let attempt = {
                        let state = ctx
                            .node_states
                            .get_mut(&id)
                            .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))?;
                        state.mark_running(now)?;
                        state.attempts
                    };
                    self.emit(&ctx, EventKind::NodeStarted { node_id: id.clone(), attempt });

                    match &node.executor {
                        None => {
                            self.complete_node(&mut ctx, node, attempt, NodeOutput::new(Map::new()), Utc::now())?;
                        }
                        Some(executor) => {
                            let dependency_outputs: HashMap<String, Value> = node
                                .dependencies
                                .iter()
                                .filter_map(|d| ctx.outputs.get(d).map(|v| (d.clone(), v.clone())))
                                .collect();
                            let dependency_artifacts: HashMap<String, Vec<String>> = node
                                .dependencies
                                .iter()
                                .map(|d| {
                                    let artifacts =
                                        ctx.node_states.get(d).map(|s| s.artifacts.clone()).unwrap_or_default();
                                    (d.clone(), artifacts)
                                })
                                .collect();
                            let envelope = NodeEnvelope {
                                dependency_outputs,
                                dependency_artifacts,
                                global_context: ctx.global_input.clone(),
                                all_outputs: ctx.outputs.clone(),
                                node_id: id.clone(),
                                attempt,
                                cancellation: self.cancel.child_token(),
                            };

                            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                            let executor = executor.clone();
                            let timeout = node.timeout.or(self.config.default_timeout);
                            let task_id = id.clone();

                            let task = async move {
                                let _permit = permit;
                                let run = executor.execute(envelope);
                                let result = match timeout {
                                    Some(d) => match tokio::time::timeout(d, run).await {
                                        Ok(r) => r,
                                        Err(_) => Err(NodeExecutorError::Transient("node timed out".to_string())),
                                    },
                                    None => run.await,
                                };
                                (task_id, attempt, result)
                            };
                            running.push(tokio::spawn(task));
                        }
                    }
                }

                self.persist(&graph_hash, &ctx).await?;
            }

            if running.is_empty() {
                if paused {
                    ctx.status = ExecutionStatus::Paused;
                    break;
                }
                if let Some(&wake) = retry_after.values().min() {
                    tokio::time::sleep_until(wake).await;
                    continue;
                }
                break;
            }

            if let Some(joined) = running.next().await {
                let (node_id, attempt, result) =
                    joined.map_err(|e| EngineError::Internal(format!("task join error: {e}")))?;
                let node = graph
                    .get(&node_id)
                    .ok_or_else(|| EngineError::Internal(format!("unknown node {node_id}")))?;
                match result {
                    Ok(output) => self.complete_node(&mut ctx, node, attempt, output, Utc::now())?,
                    Err(err) => self.handle_failure(&mut ctx, node, &mut retry_after, attempt, err)?,
                }
                self.persist(&graph_hash, &ctx).await?;
            }
        }

        if ctx.status == ExecutionStatus::Running {
            ctx.status = if ctx.any_node_failed() { ExecutionStatus::Failed } else { ExecutionStatus::Completed };
        }

        let duration_seconds = (Utc::now() - ctx.started_at).num_milliseconds() as f64 / 1000.0;
        match ctx.status {
            ExecutionStatus::Completed => {
                let completed = ctx.node_states.values().filter(|s| s.status == NodeStatus::Completed).count();
                self.emit(
                    &ctx,
                    EventKind::WorkflowCompleted { summary: format!("{completed} nodes completed"), duration_seconds },
                );
            }
            ExecutionStatus::Failed => {
                let failing_node_ids: Vec<String> = ctx
                    .node_states
                    .iter()
                    .filter(|(_, s)| s.status == NodeStatus::Failed)
                    .map(|(k, _)| k.clone())
                    .collect();
                self.emit(
                    &ctx,
                    EventKind::WorkflowFailed { failing_node_ids, error: "one or more nodes failed".to_string() },
                );
            }
            ExecutionStatus::Paused => self.emit(&ctx, EventKind::WorkflowPaused),
            ExecutionStatus::Cancelled => self.emit(&ctx, EventKind::WorkflowCancelled),
            ExecutionStatus::Running => {}
        }

        ctx.updated_at = Utc::now();
        self.persist(&graph_hash, &ctx).await?;
        Ok(ctx)
    }
}
