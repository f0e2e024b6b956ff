//! YAML-backed policy configuration loading.
//!
//! A `figment` merge chain with fail-fast validation at load time: gate
//! expressions are parsed eagerly so a malformed policy file is rejected
//! at startup rather than at first evaluation.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::expr::{Expr, ParseError};
use super::{Gate, PhaseSlo, PolicyEngine, Severity};

/// Raw, serde-facing shape of a gate before its expression is parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawGate {
    name: String,
    expression: String,
    severity: Severity,
    #[serde(default)]
    required_metrics: Vec<String>,
}

/// Raw, serde-facing shape of a phase SLO.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPhaseSlo {
    #[serde(default)]
    gates: Vec<RawGate>,
}

/// Top-level policy configuration file: `phases: { <phase_id>: { gates: [...] } }`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    phases: HashMap<String, RawPhaseSlo>,
}

/// Failures loading or validating a policy configuration file.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The file could not be read or deserialized.
    #[error("failed to load policy config: {0}")]
    Load(String),
    /// A gate's `expression` field failed to parse.
    #[error("gate '{gate}' in phase '{phase_id}' has an invalid expression: {source}")]
    InvalidExpression {
        /// Phase the offending gate belongs to.
        phase_id: String,
        /// Offending gate's name.
        gate: String,
        /// Underlying parse failure.
        source: ParseError,
    },
}

impl PolicyConfig {
    /// Load and merge a policy configuration file, falling back to an
    /// empty configuration if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| PolicyError::Load(e.to_string()))
    }

    /// Parse every gate expression and build a ready-to-use [`PolicyEngine`].
    ///
    /// Fails fast on the first malformed expression.
    pub fn into_engine(self) -> Result<PolicyEngine, PolicyError> {
        let mut phases = HashMap::new();
        for (phase_id, raw) in self.phases {
            let mut gates = Vec::with_capacity(raw.gates.len());
            for raw_gate in raw.gates {
                let expression = Expr::parse(&raw_gate.expression).map_err(|source| {
                    PolicyError::InvalidExpression {
                        phase_id: phase_id.clone(),
                        gate: raw_gate.name.clone(),
                        source,
                    }
                })?;
                gates.push(Gate {
                    name: raw_gate.name,
                    expression,
                    severity: raw_gate.severity,
                    required_metrics: raw_gate.required_metrics,
                });
            }
            phases.insert(phase_id.clone(), PhaseSlo { phase_id, gates });
        }
        Ok(PolicyEngine::new(phases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_missing_file_yields_empty_config() {
        let cfg = PolicyConfig::load("/nonexistent/path/policy.yaml").unwrap();
        assert!(cfg.phases.is_empty());
    }

    #[test]
    fn load_and_build_engine_from_valid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
phases:
  build:
    gates:
      - name: coverage_gate
        expression: "coverage >= 80"
        severity: blocking
        required_metrics: ["coverage"]
"#
        )
        .unwrap();

        let cfg = PolicyConfig::load(file.path()).unwrap();
        let engine = cfg.into_engine().unwrap();
        assert!(engine.resolve("build").is_some());
    }

    #[test]
    fn invalid_expression_fails_at_load_not_at_eval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
phases:
  build:
    gates:
      - name: broken_gate
        expression: "coverage >= "
        severity: blocking
"#
        )
        .unwrap();

        let cfg = PolicyConfig::load(file.path()).unwrap();
        let err = cfg.into_engine().unwrap_err();
        assert!(matches!(err, PolicyError::InvalidExpression { .. }));
    }
}
