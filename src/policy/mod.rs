//! Policy engine: phase SLOs, quality gates, and their evaluation against a
//! node's measured metrics.

pub mod config;
pub mod expr;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use self::expr::{EvalOutcome, Expr};

/// Severity of a quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A failing gate halts the node (and, per fail-fast config, the run).
    Blocking,
    /// A failing gate is recorded and emitted but does not halt anything.
    Warning,
}

/// A single quality gate.
#[derive(Debug, Clone)]
pub struct Gate {
    /// Gate name, surfaced in events and `PolicyVerdict::failing_gates`.
    pub name: String,
    /// Parsed boolean expression over numeric metrics.
    pub expression: Expr,
    /// Declared severity. A gate whose name is prefixed `security_` is
    /// always treated as `Blocking` regardless of the declared severity.
    pub severity: Severity,
    /// Metric names this gate's expression references, used to report
    /// which metrics were missing on evaluation.
    pub required_metrics: Vec<String>,
}

impl Gate {
    fn effective_severity(&self) -> Severity {
        let is_security = self.name.starts_with("security_")
            || self.required_metrics.iter().any(|m| m.starts_with("security_"));
        if is_security {
            Severity::Blocking
        } else {
            self.severity
        }
    }
}

/// The SLO bound to a phase id: the list of gates it must satisfy.
#[derive(Debug, Clone, Default)]
pub struct PhaseSlo {
    /// The phase id this SLO applies to.
    pub phase_id: String,
    /// Gates evaluated for nodes resolving to this phase.
    pub gates: Vec<Gate>,
}

/// A single gate's evaluated outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    /// Gate name.
    pub name: String,
    /// Whether the gate passed.
    pub passed: bool,
    /// Effective severity after the security-gate override.
    pub severity: Severity,
    /// Set when the expression referenced a metric absent from the
    /// supplied metrics map.
    pub missing_metric: Option<String>,
}

/// The result of evaluating a phase's gates against a node's metrics.
#[derive(Debug, Clone, Default)]
pub struct PolicyVerdict {
    /// Per-gate results, in declaration order.
    pub gates: Vec<GateResult>,
}

impl PolicyVerdict {
    /// Names of gates that failed with `Severity::Blocking`.
    #[must_use]
    pub fn failing_gates(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|g| !g.passed && g.severity == Severity::Blocking)
            .map(|g| g.name.clone())
            .collect()
    }

    /// Names of gates that failed with `Severity::Warning`.
    #[must_use]
    pub fn warning_gates(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|g| !g.passed && g.severity == Severity::Warning)
            .map(|g| g.name.clone())
            .collect()
    }

    /// Whether any blocking gate failed.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.failing_gates().is_empty()
    }
}

/// The set of configured phase SLOs, with id-resolution fallback.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    phases: HashMap<String, PhaseSlo>,
}

/// Generic identifier used by the `custom_component` fallback tier.
const GENERIC_PHASE_ID: &str = "custom_component";

impl PolicyEngine {
    /// Build an engine from a set of phase SLOs, keyed by `phase_id`.
    #[must_use]
    pub fn new(phases: HashMap<String, PhaseSlo>) -> Self {
        Self { phases }
    }

    /// Resolve a phase id to its SLO using the three-step fallback: exact
    /// match, then `service_*` prefix match, then the `custom_component`
    /// generic entry. Returns `None` if none apply; callers treat that as
    /// a bypass and should warn rather than silently proceed.
    #[must_use]
    pub fn resolve(&self, phase_id: &str) -> Option<&PhaseSlo> {
        if let Some(slo) = self.phases.get(phase_id) {
            return Some(slo);
        }
        if phase_id.starts_with("service_") {
            if let Some(slo) = self.phases.get("service_*") {
                return Some(slo);
            }
        }
        self.phases.get(GENERIC_PHASE_ID)
    }

    /// Evaluate a phase's gates against a metrics map.
    #[must_use]
    pub fn evaluate(&self, slo: &PhaseSlo, metrics: &HashMap<String, f64>) -> PolicyVerdict {
        let gates = slo
            .gates
            .iter()
            .map(|gate| {
                let outcome = gate.expression.eval(metrics);
                let (passed, missing_metric, severity) = match outcome {
                    EvalOutcome::Value(v) => (v, None, gate.effective_severity()),
                    // An unresolvable identifier never promotes to Blocking,
                    // even for a security-prefixed or declared-Blocking gate:
                    // there's no evidence of a real violation, only missing
                    // data.
                    EvalOutcome::MissingMetric(name) => (false, Some(name), Severity::Warning),
                };
                GateResult { name: gate.name.clone(), passed, severity, missing_metric }
            })
            .collect();
        PolicyVerdict { gates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(name: &str, expr: &str, severity: Severity) -> Gate {
        Gate {
            name: name.to_string(),
            expression: Expr::parse(expr).unwrap(),
            severity,
            required_metrics: vec![],
        }
    }

    #[test]
    fn resolve_prefers_exact_match() {
        let mut phases = HashMap::new();
        phases.insert(
            "build".to_string(),
            PhaseSlo { phase_id: "build".into(), gates: vec![] },
        );
        let engine = PolicyEngine::new(phases);
        assert!(engine.resolve("build").is_some());
    }

    #[test]
    fn resolve_falls_back_to_service_prefix() {
        let mut phases = HashMap::new();
        phases.insert(
            "service_*".to_string(),
            PhaseSlo { phase_id: "service_*".into(), gates: vec![] },
        );
        let engine = PolicyEngine::new(phases);
        assert!(engine.resolve("service_billing").is_some());
        assert!(engine.resolve("unrelated").is_none());
    }

    #[test]
    fn resolve_falls_back_to_generic_custom_component() {
        let mut phases = HashMap::new();
        phases.insert(
            GENERIC_PHASE_ID.to_string(),
            PhaseSlo { phase_id: GENERIC_PHASE_ID.into(), gates: vec![] },
        );
        let engine = PolicyEngine::new(phases);
        assert!(engine.resolve("anything_else").is_some());
    }

    #[test]
    fn evaluate_reports_passing_and_failing_gates() {
        let slo = PhaseSlo {
            phase_id: "build".into(),
            gates: vec![
                gate("coverage_gate", "coverage >= 80", Severity::Blocking),
                gate("lint_gate", "lint_errors == 0", Severity::Warning),
            ],
        };
        let engine = PolicyEngine::new(HashMap::new());
        let mut metrics = HashMap::new();
        metrics.insert("coverage".to_string(), 70.0);
        metrics.insert("lint_errors".to_string(), 2.0);

        let verdict = engine.evaluate(&slo, &metrics);
        assert_eq!(verdict.failing_gates(), vec!["coverage_gate".to_string()]);
        assert_eq!(verdict.warning_gates(), vec!["lint_gate".to_string()]);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn security_prefixed_gate_is_never_downgraded() {
        let slo = PhaseSlo {
            phase_id: "build".into(),
            gates: vec![gate("security_scan", "vulns == 0", Severity::Warning)],
        };
        let engine = PolicyEngine::new(HashMap::new());
        let mut metrics = HashMap::new();
        metrics.insert("vulns".to_string(), 3.0);

        let verdict = engine.evaluate(&slo, &metrics);
        assert_eq!(verdict.gates[0].severity, Severity::Blocking);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn missing_metric_fails_gate_without_panicking() {
        let slo = PhaseSlo {
            phase_id: "build".into(),
            gates: vec![gate("coverage_gate", "coverage >= 80", Severity::Blocking)],
        };
        let engine = PolicyEngine::new(HashMap::new());
        let verdict = engine.evaluate(&slo, &HashMap::new());
        assert_eq!(verdict.gates[0].missing_metric.as_deref(), Some("coverage"));
        assert!(!verdict.gates[0].passed);
    }

    #[test]
    fn missing_metric_downgrades_a_blocking_gate_to_warning() {
        let slo = PhaseSlo {
            phase_id: "build".into(),
            gates: vec![gate("coverage_gate", "coverage >= 80", Severity::Blocking)],
        };
        let engine = PolicyEngine::new(HashMap::new());
        let verdict = engine.evaluate(&slo, &HashMap::new());
        assert_eq!(verdict.gates[0].severity, Severity::Warning);
        assert!(!verdict.is_blocked());
        assert_eq!(verdict.warning_gates(), vec!["coverage_gate".to_string()]);
    }

    #[test]
    fn missing_metric_downgrades_even_a_security_prefixed_gate() {
        let slo = PhaseSlo {
            phase_id: "build".into(),
            gates: vec![gate("security_scan", "vulns == 0", Severity::Blocking)],
        };
        let engine = PolicyEngine::new(HashMap::new());
        let verdict = engine.evaluate(&slo, &HashMap::new());
        assert_eq!(verdict.gates[0].severity, Severity::Warning);
        assert!(!verdict.is_blocked());
    }
}
