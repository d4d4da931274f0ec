//! Model metadata: the serde-backed description of a model's variables,
//! dependency edges, and event indicators, and the translation from that
//! description into a `qss-core` variable arena (spec.md §6.2, SPEC_FULL
//! §6.2 supplement).

use serde::{Deserialize, Serialize};

use qss_core::{CrossingType, Variable, VariableId, VariableKind, ZeroCrossingState};

use crate::error::{EngineError, Result};

/// Per-variable tolerance overrides; unset fields fall back to the
/// model's `default_tolerances`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToleranceOverrides {
    pub r_tol: Option<f64>,
    pub a_tol: Option<f64>,
    pub z_tol: Option<f64>,
}

/// One model variable's static description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub id: usize,
    pub name: String,
    pub kind: VariableKind,
    pub order: u8,
    pub initial_value: f64,
    #[serde(default)]
    pub tolerances: ToleranceOverrides,
    #[serde(default)]
    pub crossing_types: Vec<CrossingType>,
    #[serde(default)]
    pub handler_id: Option<usize>,
}

/// A raw `observer reads observee` edge, by variable id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub observer_id: usize,
    pub observee_id: usize,
}

/// Binds an event-indicator (zero-crossing) variable to the handler
/// variables its crossing re-initializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIndicatorDescriptor {
    pub indicator_id: usize,
    pub handler_variable_ids: Vec<usize>,
}

/// The full static description of one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub variables: Vec<VariableDescriptor>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
    #[serde(default)]
    pub event_indicators: Vec<EventIndicatorDescriptor>,
    #[serde(default)]
    pub default_tolerances: ToleranceOverrides,
}

impl ModelMetadata {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Instantiate a `qss-core` variable arena from this description.
    /// Variable ids must be a dense `0..n` permutation matching each
    /// descriptor's array index; this mirrors the core's own
    /// arena-by-index convention (spec.md §3.2, §9).
    pub fn build_variables(&self) -> Result<Vec<Variable>> {
        let n = self.variables.len();
        let mut out: Vec<Option<Variable>> = (0..n).map(|_| None).collect();

        for d in &self.variables {
            if d.id >= n {
                return Err(EngineError::model(format!("variable '{}' has id {} but model has {} variables", d.name, d.id, n)));
            }
            let r_tol = d.tolerances.r_tol.or(self.default_tolerances.r_tol).unwrap_or(1.0e-4);
            let a_tol = d.tolerances.a_tol.or(self.default_tolerances.a_tol).unwrap_or(1.0e-6);
            let z_tol = d.tolerances.z_tol.or(self.default_tolerances.z_tol).unwrap_or(0.0);

            let mut v = Variable::new(VariableId(d.id), d.name.clone(), d.kind, d.order, r_tol, a_tol, z_tol);
            v.x[0] = d.initial_value;
            v.q[0] = d.initial_value;
            if d.kind.is_zero_crossing() {
                let relevant = if d.crossing_types.is_empty() { vec![CrossingType::Up, CrossingType::Dn] } else { d.crossing_types.clone() };
                v.zero_crossing = Some(ZeroCrossingState::new(relevant, d.handler_id));
            }
            if out[d.id].is_some() {
                return Err(EngineError::model(format!("duplicate variable id {}", d.id)));
            }
            out[d.id] = Some(v);
        }

        let mut variables: Vec<Variable> = out
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| EngineError::model(format!("no variable descriptor for id {i}"))))
            .collect::<Result<_>>()?;

        for e in &self.edges {
            if e.observer_id >= n || e.observee_id >= n {
                return Err(EngineError::model(format!("dependency edge references out-of-range id ({}, {})", e.observer_id, e.observee_id)));
            }
            variables[e.observer_id].observees.push(VariableId(e.observee_id));
            variables[e.observee_id].observers.push(VariableId(e.observer_id));
        }

        for ind in &self.event_indicators {
            if ind.indicator_id >= n {
                return Err(EngineError::model(format!("event indicator references out-of-range id {}", ind.indicator_id)));
            }
            variables[ind.indicator_id].handler_variables = ind.handler_variable_ids.iter().map(|&i| VariableId(i)).collect();
        }

        Ok(variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qss_core::{DerivativeSource, StateAlgorithm};

    fn sample_toml() -> &'static str {
        r#"
name = "decay"

[default_tolerances]
r_tol = 1e-4
a_tol = 1e-6

[[variables]]
id = 0
name = "x"
order = 1
initial_value = 1.0

[variables.kind]
Continuous = { algorithm = "Qss", derivative_source = "Directional" }
"#
    }

    #[test]
    fn parses_toml_and_builds_variables() {
        let meta = ModelMetadata::from_toml(sample_toml()).unwrap();
        let vars = meta.build_variables().unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "x");
        assert_eq!(vars[0].x[0], 1.0);
        assert!(matches!(vars[0].kind, VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional }));
    }

    #[test]
    fn rejects_out_of_range_edge() {
        let mut meta = ModelMetadata::from_toml(sample_toml()).unwrap();
        meta.edges.push(DependencyEdge { observer_id: 0, observee_id: 9 });
        assert!(meta.build_variables().is_err());
    }
}
