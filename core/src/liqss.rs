//! LIQSS1/2/3 requantization: the two-phase (candidate evaluation, then
//! commit) hysteretic quantum-selection protocol for self-observing
//! state variables (spec.md §4.5).
//!
//! Grounded on `original_source/src/QSS/dfn/Variable_LIQSS1.hh`'s
//! `advance_LIQSS`: evaluate the oracle's derivative with the variable
//! pinned to `q_c - qTol` and to `q_c + qTol`, then pick the quantum
//! level from the sign pattern of the two candidate derivatives.

use crate::error::Result;
use crate::math::sign;
use crate::oracle::{Oracle, Scope};
use crate::queue::EventQueue;
use crate::requant::{nearest_driven_t_z, predict_t_e_capped, roll_forward, SimConfig};
use crate::superdense::{EventKind, SuperdenseTime};
use crate::variable::{Variable, VariableId};

/// Which observee representation to read when evaluating candidate
/// derivatives: a lone trigger uses the (already current) quantized rep
/// of its observees, a simultaneous-trigger group uses the continuous
/// rep to avoid order-dependent coupling (spec.md §4.5, §4.7 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveeRep {
    Quantized,
    Continuous,
}

fn push_observees<O: Oracle>(oracle: &mut O, variables: &[Variable], refs: &[VariableId], t: f64, rep: ObserveeRep) {
    oracle.set_time(t);
    for &r in refs {
        let ov = &variables[r.0];
        let v = match rep {
            ObserveeRep::Quantized => ov.q_at(t),
            ObserveeRep::Continuous => ov.x_at(t),
        };
        oracle.set_real(r, v);
    }
}

/// Derivatives of `var_ref` up to `order`, evaluated with the variable
/// pinned to `pinned_value` at time `t`. `[0]` is always the first
/// derivative; `[1]`/`[2]` hold the centered/forward numeric-difference
/// estimates of the second/third derivative, matching the scheme used
/// in `requant::requantize_qss` for consistency.
fn candidate_derivatives<O: Oracle>(
    oracle: &mut O,
    var_ref: VariableId,
    pinned_value: f64,
    t: f64,
    order: u8,
    dt_nd: f64,
) -> Result<[f64; 3]> {
    let mut scope = Scope::new(oracle, &[var_ref]);
    scope.oracle_mut().set_time(t);
    scope.oracle_mut().set_real(var_ref, pinned_value);
    let mut d = [0.0f64; 3];
    let mut d1 = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut d1)?;
    d[0] = d1[0];

    if order >= 2 {
        scope.oracle_mut().set_time(t + dt_nd);
        scope.oracle_mut().set_real(var_ref, pinned_value);
        let mut f_plus = [0.0f64; 1];
        scope.oracle_mut().derivatives(&[var_ref], &mut f_plus)?;
        scope.oracle_mut().set_time(t - dt_nd);
        scope.oracle_mut().set_real(var_ref, pinned_value);
        let mut f_minus = [0.0f64; 1];
        scope.oracle_mut().derivatives(&[var_ref], &mut f_minus)?;
        d[1] = 0.5 * (f_plus[0] - f_minus[0]) / (2.0 * dt_nd);
    }
    if order >= 3 {
        scope.oracle_mut().set_time(t + 2.0 * dt_nd);
        scope.oracle_mut().set_real(var_ref, pinned_value);
        let mut f_pp = [0.0f64; 1];
        scope.oracle_mut().derivatives(&[var_ref], &mut f_pp)?;
        scope.oracle_mut().set_time(t + dt_nd);
        scope.oracle_mut().set_real(var_ref, pinned_value);
        let mut f_p = [0.0f64; 1];
        scope.oracle_mut().derivatives(&[var_ref], &mut f_p)?;
        scope.oracle_mut().set_time(t);
        scope.oracle_mut().set_real(var_ref, pinned_value);
        let mut f_0 = [0.0f64; 1];
        scope.oracle_mut().derivatives(&[var_ref], &mut f_0)?;
        d[2] = (f_pp[0] - 2.0 * f_p[0] + f_0[0]) / (dt_nd * dt_nd * 6.0);
    }
    Ok(d)
}

/// Chosen quantum level and the trajectory coefficients that go with it.
struct LiqssChoice {
    q0: f64,
    x: [f64; 4],
}

fn choose_quantum(order: u8, q_c: f64, q_tol: f64, at_low: [f64; 3], at_high: [f64; 3]) -> LiqssChoice {
    let top = order as usize - 1;
    let lo = at_low[top];
    let hi = at_high[top];
    let q_l = q_c - q_tol;
    let q_u = q_c + q_tol;

    let (dls, dus) = (sign(lo), sign(hi));

    if dls == -1 && dus == -1 {
        LiqssChoice { q0: q_l, x: shift_into_x(order, q_l, &at_low) }
    } else if dls == 1 && dus == 1 {
        LiqssChoice { q0: q_u, x: shift_into_x(order, q_u, &at_high) }
    } else if dls == 0 && dus == 0 {
        LiqssChoice { q0: q_c, x: shift_into_x(order, q_c, &at_low) }
    } else {
        // Opposite signs: interpolate the top-order derivative's zero
        // between (q_l, lo) and (q_u, hi), clipped to [q_l, q_u].
        let frac = lo / (lo - hi);
        let q0 = (q_l + frac * (q_u - q_l)).clamp(q_l, q_u);
        let interpolated = [
            at_low[0] + frac * (at_high[0] - at_low[0]),
            at_low[1] + frac * (at_high[1] - at_low[1]),
            at_low[2] + frac * (at_high[2] - at_low[2]),
        ];
        LiqssChoice { q0, x: shift_into_x(order, q0, &interpolated) }
    }
}

/// Pack `x_0 = q0` plus the derivative-family coefficients into the
/// Taylor-coefficient layout (`x[1] = d1`, `x[2] = d2/2`, `x[3] = d3/6`;
/// `candidate_derivatives` already divides by the right factorial for
/// [1] and [2]).
fn shift_into_x(order: u8, q0: f64, d: &[f64; 3]) -> [f64; 4] {
    let mut x = [0.0f64; 4];
    x[0] = q0;
    if order >= 1 {
        x[1] = d[0];
    }
    if order >= 2 {
        x[2] = d[1];
    }
    if order >= 3 {
        x[3] = d[2];
    }
    x
}

/// A not-yet-committed LIQSS decision, produced during a simultaneous
/// trigger group's Stage LIQSS (spec.md §4.7 step 4) and applied later
/// via [`commit_liqss_candidate`] once every member of the group has
/// finished evaluating, so no member reads another's updated `q_0`.
pub struct PendingLiqss {
    pub idx: usize,
    pub q0: f64,
    pub x: [f64; 4],
}

/// Evaluate (without committing) the LIQSS quantum choice for `idx`,
/// reading its *other* observees via `rep` (the simultaneous-trigger
/// path always passes `ObserveeRep::Continuous`). Assumes `idx` has
/// already gone through Stage 0 (rolled forward, `tQ == tX == t`).
pub fn evaluate_liqss_candidate<O: Oracle>(
    variables: &[Variable],
    oracle: &mut O,
    config: &SimConfig,
    idx: usize,
    rep: ObserveeRep,
) -> Result<PendingLiqss> {
    let t = variables[idx].t_x;
    let q_c = variables[idx].x[0];
    let var_ref = variables[idx].id;
    let order = variables[idx].order;
    let q_tol = variables[idx].q_tol;
    let others: Vec<VariableId> = variables[idx]
        .computational_observees
        .iter()
        .copied()
        .filter(|&r| r != var_ref)
        .collect();
    push_observees(oracle, variables, &others, t, rep);

    let at_low = candidate_derivatives(oracle, var_ref, q_c - q_tol, t, order, config.dt_nd)?;
    let at_high = candidate_derivatives(oracle, var_ref, q_c + q_tol, t, order, config.dt_nd)?;
    let choice = choose_quantum(order, q_c, q_tol, at_low, at_high);
    Ok(PendingLiqss { idx, q0: choice.q0, x: choice.x })
}

/// Requantize a self-observing variable `u` at `tE` using the LIQSS
/// two-phase protocol (spec.md §4.5). `rep` selects the observee
/// representation used for the *other* observees' values; `u` itself
/// is always pinned to the candidate quantum level under test.
pub fn requantize_liqss<O: Oracle>(
    variables: &mut [Variable],
    oracle: &mut O,
    config: &SimConfig,
    queue: &mut EventQueue,
    idx: usize,
    rep: ObserveeRep,
) -> Result<Vec<VariableId>> {
    let t_e = variables[idx].t_e;
    roll_forward(&mut variables[idx], t_e);
    variables[idx].t_q = t_e;
    let q_c = variables[idx].x[0];

    let var_ref = variables[idx].id;
    let order = variables[idx].order;
    let others: Vec<VariableId> = variables[idx]
        .computational_observees
        .iter()
        .copied()
        .filter(|&r| r != var_ref)
        .collect();
    push_observees(oracle, variables, &others, t_e, rep);

    variables[idx].recompute_q_tol();
    let q_tol = variables[idx].q_tol;

    let at_low = candidate_derivatives(oracle, var_ref, q_c - q_tol, t_e, order, config.dt_nd)?;
    let at_high = candidate_derivatives(oracle, var_ref, q_c + q_tol, t_e, order, config.dt_nd)?;

    let choice = choose_quantum(order, q_c, q_tol, at_low, at_high);

    variables[idx].q[0] = choice.q0;
    variables[idx].x = choice.x;
    oracle.set_time(t_e);
    oracle.set_real(var_ref, choice.q0);

    let driving_t_z = nearest_driven_t_z(variables, idx);
    let new_t_e = predict_t_e_capped(&variables[idx], config, driving_t_z);
    variables[idx].t_e = new_t_e;
    let handle = variables[idx].event_handle.expect("LIQSS-requantized variable must already be scheduled");
    let new_sdt = SuperdenseTime::with_kind(new_t_e, 0, EventKind::Qss);
    let new_handle = queue.shift(handle, new_sdt, None);
    variables[idx].event_handle = Some(new_handle);

    Ok(variables[idx].computational_observers.clone())
}

/// Commit a LIQSS candidate chosen earlier during a simultaneous-trigger
/// group's Stage LIQSS (spec.md §4.7 step 4, §4.5 final paragraph): the
/// deferred write happens here, after every member of the group has
/// finished evaluating its candidate against the *continuous* observee
/// representation.
pub fn commit_liqss_candidate(variables: &mut [Variable], idx: usize, q0: f64, x: [f64; 4]) {
    variables[idx].q[0] = q0;
    variables[idx].x = x;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{DerivativeSource, StateAlgorithm, VariableId, VariableKind};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Oracle for `dx/dt = -x` pinned-value queries: derivative is just
    /// `-value_of(var_ref)`, independent of time, so LIQSS should settle
    /// on the downward branch (both candidate derivatives negative once
    /// `q_c > 0`).
    struct DecayOracle {
        t: f64,
        reals: RefCell<HashMap<usize, f64>>,
    }

    impl Oracle for DecayOracle {
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
        fn derivatives(&self, state_refs: &[VariableId], out: &mut [f64]) -> Result<()> {
            for (r, o) in state_refs.iter().zip(out.iter_mut()) {
                *o = -self.get_real(*r);
            }
            Ok(())
        }
        fn directional_derivatives(
            &self,
            _seed_refs: &[VariableId],
            _output_refs: &[VariableId],
            _seed_vals: &[f64],
            _out_vals: &mut [f64],
        ) -> Result<()> {
            Ok(())
        }
        fn do_event_iteration(&mut self) {}
        fn completed_integrator_step(&mut self) {}
        fn get_event_indicators(&self, _out: &mut [f64]) {}
    }

    fn self_observing_order1() -> Variable {
        let mut v = Variable::new(
            VariableId(0),
            "x",
            VariableKind::Continuous { algorithm: StateAlgorithm::Liqss, derivative_source: DerivativeSource::Directional },
            1,
            1e-2,
            1e-3,
            0.0,
        );
        v.observees = vec![VariableId(0)];
        v.computational_observees = vec![VariableId(0)];
        v.self_observer = true;
        v.x[0] = 10.0;
        v
    }

    #[test]
    fn downward_trajectory_picks_lower_quantum() {
        let mut vars = vec![self_observing_order1()];
        let mut oracle = DecayOracle { t: 0.0, reals: RefCell::new(HashMap::new()) };
        let mut queue = EventQueue::new();
        let handle = queue.add(SuperdenseTime::with_kind(0.0, 0, EventKind::Qss), VariableId(0), "x", EventKind::Qss);
        vars[0].event_handle = Some(handle);
        vars[0].t_e = 0.0;
        let config = SimConfig::default();

        requantize_liqss(&mut vars, &mut oracle, &config, &mut queue, 0, ObserveeRep::Quantized).unwrap();
        // x starts at 10 > 0, both q_l and q_u candidate derivatives are
        // negative (-q_l, -q_u < 0) -> downward branch -> q0 = q_c - qTol.
        assert!(vars[0].q[0] < 10.0);
        assert!(vars[0].x[1] < 0.0);
    }
}
