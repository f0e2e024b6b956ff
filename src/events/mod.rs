//! Execution event stream: a synchronous, panic-isolated fan-out to
//! caller-supplied handlers. A handler is invoked on the scheduler task
//! itself, wrapped in `catch_unwind` so a panicking handler can't take
//! the rest of the handler list down with it.

use chrono::{DateTime, Utc};

use crate::policy::GateResult;

/// Every externally observable event the engine can emit.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// The run began.
    WorkflowStarted,
    /// The run finished with every node `Completed` or `Skipped`.
    WorkflowCompleted {
        /// Human-readable summary (e.g. node counts).
        summary: String,
        /// Wall-clock duration of the run, in seconds.
        duration_seconds: f64,
    },
    /// The run ended with at least one node permanently `Failed`.
    WorkflowFailed {
        /// Ids of nodes that failed.
        failing_node_ids: Vec<String>,
        /// Description of the terminal failure.
        error: String,
    },
    /// The run was paused.
    WorkflowPaused,
    /// The run was cancelled.
    WorkflowCancelled,
    /// A node's dependencies are satisfied and it entered `Ready`.
    NodeReady {
        /// The node id.
        node_id: String,
    },
    /// A node was dispatched to its executor.
    NodeStarted {
        /// The node id.
        node_id: String,
        /// 1-indexed attempt number.
        attempt: u32,
    },
    /// A node finished successfully.
    NodeCompleted {
        /// The node id.
        node_id: String,
        /// The attempt that succeeded.
        attempt: u32,
        /// Keys present in the node's output map.
        output_keys: Vec<String>,
        /// Number of artifacts produced.
        artifact_count: usize,
    },
    /// A node's attempt failed.
    NodeFailed {
        /// The node id.
        node_id: String,
        /// The attempt that failed.
        attempt: u32,
        /// A short label for the error kind (`transient`, `fatal`,
        /// `policy_violation`, `cancelled`).
        error_kind: String,
        /// Human-readable failure description.
        error_message: String,
        /// Whether the scheduler will retry this node.
        will_retry: bool,
    },
    /// A node was bypassed because its condition evaluated false.
    NodeSkipped {
        /// The node id.
        node_id: String,
        /// Human-readable reason (usually the rendered condition).
        condition_reason: String,
    },
    /// A node is about to be retried after a transient failure.
    NodeRetry {
        /// The node id.
        node_id: String,
        /// The attempt number that will run next.
        next_attempt: u32,
        /// Delay before the next attempt, per the node's backoff policy.
        delay_seconds: f64,
    },
    /// A phase's gates were evaluated against a node's metrics.
    PolicyEvaluated {
        /// The node id the gates were evaluated for.
        node_id: String,
        /// The resolved phase id.
        phase_id: String,
        /// Per-gate outcomes.
        gates: Vec<GateResult>,
    },
    /// A blocking gate failed.
    PolicyBlocked {
        /// The node id.
        node_id: String,
        /// Names of the failing blocking gates.
        failing_gates: Vec<String>,
    },
}

/// A single timestamped, execution-scoped event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The execution this event belongs to.
    pub execution_id: String,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
    /// The event payload.
    pub kind: EventKind,
}

/// A synchronous event sink.
///
/// Implementors must not mutate engine state from `handle`; the engine
/// invokes handlers inline on the scheduler task. A handler that panics is
/// caught and logged, never allowed to unwind into the scheduler.
pub trait EventHandler: Send + Sync {
    /// Observe a single event.
    fn handle(&self, event: &Event);
}

/// Fan an event out to every registered handler, isolating panics.
pub(crate) fn dispatch(handlers: &[std::sync::Arc<dyn EventHandler>], event: &Event) {
    for handler in handlers {
        let handler = std::panic::AssertUnwindSafe(|| handler.handle(event));
        if let Err(panic) = std::panic::catch_unwind(handler) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(event = ?event.kind, %message, "event handler panicked");
        }
    }
}

/// A test/diagnostic handler that records every event it observes.
#[derive(Default)]
pub struct CollectingHandler {
    events: std::sync::Mutex<Vec<Event>>,
}

impl CollectingHandler {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every event observed so far, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("collecting handler lock poisoned").clone()
    }
}

impl EventHandler for CollectingHandler {
    fn handle(&self, event: &Event) {
        self.events.lock().expect("collecting handler lock poisoned").push(event.clone());
    }
}
