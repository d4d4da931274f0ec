//! Simultaneous trigger groups: the staged pooled-evaluation protocol
//! used whenever more than one variable shares an event-queue pass
//! (spec.md §4.7).

use crate::error::Result;
use crate::liqss::{commit_liqss_candidate, evaluate_liqss_candidate, ObserveeRep, PendingLiqss};
use crate::oracle::Oracle;
use crate::queue::EventQueue;
use crate::requant::{
    advance_observer, nearest_driven_t_z, oracle_second_derivative, oracle_third_derivative, predict_t_e_capped, push_observee_values, roll_forward, SimConfig,
};
use crate::superdense::{EventKind, SuperdenseTime};
use crate::variable::{StateAlgorithm, Variable, VariableId, VariableKind};
use crate::zerocrossing::predict_crossing;

/// Reusable scratch for [`run_simultaneous_trigger_group`]'s pooled
/// first-derivative call, sized once by `Simulator::initialize` so no
/// `Vec` is allocated per event batch (spec.md §5).
#[derive(Debug, Default)]
pub struct TriggerScratch {
    d1: Vec<f64>,
}

impl TriggerScratch {
    pub fn with_capacity(n: usize) -> Self {
        Self { d1: Vec::with_capacity(n) }
    }

    fn resize(buf: &mut Vec<f64>, n: usize) -> &mut [f64] {
        buf.clear();
        buf.resize(n, 0.0);
        &mut buf[..]
    }
}

/// Expand a set of simultaneously-firing trigger ids with every other
/// member of any state-dependency cluster (§3.5) one of them belongs
/// to, so cluster-coupled variables always requantize in the same pass.
pub fn expand_with_clusters(variables: &[Variable], triggers: &[VariableId]) -> Vec<VariableId> {
    let mut set: Vec<VariableId> = triggers.to_vec();
    for &t in triggers {
        if let Some(cluster) = variables[t.0].cluster {
            for v in variables {
                if v.cluster == Some(cluster) && !set.contains(&v.id) {
                    set.push(v.id);
                }
            }
        }
    }
    set.sort_by(|a, b| variables[a.0].name.cmp(&variables[b.0].name));
    set.dedup();
    set
}

/// Run the full staged simultaneous-trigger protocol for `triggers` at
/// time `t` (spec.md §4.7 steps 1-6). Returns the set of non-trigger
/// observers that were advanced, for the caller to sample outputs from.
///
/// Zero-crossing members of `triggers` never run the pooled QSS math
/// below -- an event indicator's value is a function of its observee's
/// state, not an integrated derivative -- so they're routed directly
/// through [`predict_crossing`], mirroring `Simulator::advance_single`'s
/// special-case for a solitary zero-crossing trigger.
pub fn run_simultaneous_trigger_group<O: Oracle>(
    variables: &mut [Variable],
    oracle: &mut O,
    config: &SimConfig,
    queue: &mut EventQueue,
    scratch: &mut TriggerScratch,
    triggers: &[VariableId],
    t: f64,
) -> Result<Vec<VariableId>> {
    let mut triggers = triggers.to_vec();
    triggers.sort_by(|a, b| variables[a.0].name.cmp(&variables[b.0].name));

    let state_triggers: Vec<VariableId> = triggers.iter().copied().filter(|v| !variables[v.0].kind.is_zero_crossing()).collect();
    let zc_triggers: Vec<VariableId> = triggers.iter().copied().filter(|v| variables[v.0].kind.is_zero_crossing()).collect();

    // Stage 0: roll each state trigger forward, align tQ/tX to t, capture x0.
    for &v in &state_triggers {
        roll_forward(&mut variables[v.0], t);
        variables[v.0].t_q = t;
    }

    // Push every state trigger's own observees (continuous rep, per
    // §4.7 step 4's rationale: none of the group's quantized reps are
    // final yet) so the pooled derivative calls below see consistent
    // inputs.
    let all_observees: Vec<VariableId> = {
        let mut set = Vec::new();
        for &v in &state_triggers {
            set.extend(variables[v.0].computational_observees.iter().copied());
        }
        set.sort_unstable();
        set.dedup();
        set
    };
    push_observee_values(oracle, variables, &all_observees, t);

    // Stage 1: pooled first-derivative call.
    if !state_triggers.is_empty() {
        let refs: Vec<VariableId> = state_triggers.iter().map(|v| variables[v.0].id).collect();
        oracle.set_time(t);
        let d1 = TriggerScratch::resize(&mut scratch.d1, refs.len());
        oracle.derivatives(&refs, d1)?;
        for (i, &v) in state_triggers.iter().enumerate() {
            variables[v.0].x[1] = d1[i];
        }
    }

    // Stage 2, 3: orders >= 2, each selecting the oracle's directional-
    // derivative call or a numeric-difference stencil per variable's
    // `DerivativeSource` (spec.md §4.3 step 4).
    for &v in &state_triggers {
        if variables[v.0].order >= 2 {
            variables[v.0].x[2] = oracle_second_derivative(variables, oracle, config, v.0, t)?;
        }
    }
    for &v in &state_triggers {
        if variables[v.0].order >= 3 {
            variables[v.0].x[3] = oracle_third_derivative(variables, oracle, config, v.0, t)?;
        }
    }

    // Stage LIQSS: self-observing members evaluate their candidate
    // against the continuous rep, but commit is deferred until every
    // member has evaluated (spec.md §4.5 final paragraph).
    let mut pending: Vec<PendingLiqss> = Vec::new();
    for &v in &state_triggers {
        let is_liqss_self = matches!(
            variables[v.0].kind,
            VariableKind::Continuous { algorithm: StateAlgorithm::Liqss, .. }
        ) && variables[v.0].self_observer;
        if is_liqss_self {
            variables[v.0].recompute_q_tol();
            let candidate = evaluate_liqss_candidate(variables, oracle, config, v.0, ObserveeRep::Continuous)?;
            pending.push(candidate);
        }
    }
    for p in pending {
        commit_liqss_candidate(variables, p.idx, p.q0, p.x);
    }

    // Stage Final: qTol, tE, reschedule for every state trigger
    // (explicit-QSS members use their freshly pooled x coefficients
    // directly; LIQSS members already have their committed x/q set
    // above).
    for &v in &state_triggers {
        let is_liqss_self = matches!(
            variables[v.0].kind,
            VariableKind::Continuous { algorithm: StateAlgorithm::Liqss, .. }
        ) && variables[v.0].self_observer;
        if !is_liqss_self {
            let order = variables[v.0].order as usize;
            let x_snapshot = variables[v.0].x;
            variables[v.0].q[..order].copy_from_slice(&x_snapshot[..order]);
        }
        variables[v.0].recompute_q_tol();
        let driving_t_z = nearest_driven_t_z(variables, v.0);
        let new_t_e = predict_t_e_capped(&variables[v.0], config, driving_t_z);
        variables[v.0].t_e = new_t_e;
        if let Some(handle) = variables[v.0].event_handle {
            let new_sdt = SuperdenseTime::with_kind(new_t_e, 0, EventKind::Qss);
            let new_handle = queue.shift(handle, new_sdt, None);
            variables[v.0].event_handle = Some(new_handle);
        }
    }

    // Zero-crossing members root-find their own `x(t) = 0` directly,
    // mirroring their observee's (now-final) trajectory.
    for &zc in &zc_triggers {
        predict_crossing(variables, oracle, queue, zc.0, t)?;
    }

    // Observer propagation: union of state triggers' observers minus the
    // full trigger set (zero-crossing triggers already handled above;
    // any zero-crossing that merely *observes* a state trigger still
    // reaches `predict_crossing` here, via `advance_observer`'s own
    // zero-crossing special case), advanced once each.
    let trigger_set: Vec<VariableId> = triggers.clone();
    let mut observers: Vec<VariableId> = Vec::new();
    for &v in &state_triggers {
        observers.extend(variables[v.0].computational_observers.iter().copied());
    }
    observers.sort_by(|a, b| variables[a.0].name.cmp(&variables[b.0].name));
    observers.dedup();
    observers.retain(|o| !trigger_set.contains(o));

    for &o in &observers {
        advance_observer(variables, oracle, config, queue, o.0, t)?;
    }

    Ok(observers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as QssResult;
    use crate::variable::{DerivativeSource, Variable, VariableId};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct LinearOracle {
        t: f64,
        reals: RefCell<HashMap<usize, f64>>,
    }

    impl Oracle for LinearOracle {
        fn time(&self) -> f64 {
            self.t
        }
        fn set_time(&mut self, t: f64) {
            self.t = t;
        }
        fn get_real(&self, r: VariableId) -> f64 {
            *self.reals.borrow().get(&r.0).unwrap_or(&0.0)
        }
        fn set_real(&mut self, r: VariableId, v: f64) {
            self.reals.borrow_mut().insert(r.0, v);
        }
        fn get_integer(&self, _r: VariableId) -> i64 {
            0
        }
        fn set_integer(&mut self, _r: VariableId, _v: i64) {}
        fn get_boolean(&self, _r: VariableId) -> bool {
            false
        }
        fn set_boolean(&mut self, _r: VariableId, _v: bool) {}
        fn derivatives(&self, state_refs: &[VariableId], out: &mut [f64]) -> QssResult<()> {
            for (r, o) in state_refs.iter().zip(out.iter_mut()) {
                *o = match r.0 {
                    0 => 1.0,
                    1 => -self.get_real(VariableId(0)),
                    _ => 0.0,
                };
            }
            Ok(())
        }
        fn directional_derivatives(&self, _s: &[VariableId], _o: &[VariableId], _sv: &[f64], _ov: &mut [f64]) -> QssResult<()> {
            Ok(())
        }
        fn do_event_iteration(&mut self) {}
        fn completed_integrator_step(&mut self) {}
        fn get_event_indicators(&self, _out: &mut [f64]) {}
    }

    fn qss1_var(id: usize, name: &str) -> Variable {
        Variable::new(
            VariableId(id),
            name,
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            1,
            1e-3,
            1e-6,
            0.0,
        )
    }

    #[test]
    fn pooled_stage_assigns_first_derivatives() {
        let mut a = qss1_var(0, "a");
        let mut b = qss1_var(1, "b");
        a.observees = vec![];
        b.observees = vec![VariableId(0)];
        b.computational_observees = vec![VariableId(0)];
        let mut vars = vec![a.clone(), b.clone()];
        let mut oracle = LinearOracle { t: 0.0, reals: RefCell::new(HashMap::new()) };
        let mut queue = EventQueue::new();
        for v in vars.iter_mut() {
            let h = queue.add(SuperdenseTime::with_kind(0.0, 0, EventKind::Qss), v.id, &v.name, EventKind::Qss);
            v.event_handle = Some(h);
            v.t_e = 0.0;
        }
        let config = SimConfig::default();
        let triggers = vec![VariableId(0), VariableId(1)];
        let mut scratch = TriggerScratch::with_capacity(vars.len());
        run_simultaneous_trigger_group(&mut vars, &mut oracle, &config, &mut queue, &mut scratch, &triggers, 0.0).unwrap();
        assert!((vars[0].x[1] - 1.0).abs() < 1e-12);
        let _ = (a, b);
    }
}
