//! Explicit QSS1/2/3 requantization, `tE` prediction, and observer
//! advance (spec.md §4.2–§4.4).
//!
//! The aligned/unaligned crossing-time formulas are derived uniformly
//! for every order by Taylor-shifting the quantized polynomial from its
//! basepoint `tQ` to the continuous polynomial's basepoint `tX` and
//! solving `diff(delta) = +-qTol` for the minimum positive `delta`; this
//! collapses to the reference solver's per-order `set_tE_aligned`/
//! `set_tE_unaligned` formulas (verified against
//! `original_source/src/QSS/VariableQSS2.hh`, `VariableQSS3.hh`,
//! `Variable_QSS1.hh`) when `tQ == tX`.

use crate::error::Result;
use crate::math::{min_positive_root_cubic, min_positive_root_linear, min_positive_root_quadratic, sign};
use crate::oracle::{Oracle, Scope};
use crate::queue::EventQueue;
use crate::superdense::{EventKind, SuperdenseTime};
use crate::variable::{DerivativeSource, Variable, VariableId, VariableKind, MAX_ORDER};

/// Simulation-wide numeric knobs (spec.md §4.2, §4.3, §9).
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub dt_min: f64,
    pub dt_max: f64,
    /// Large-but-finite fallback substituted for an infinite predicted
    /// `dt` before clipping to `[dt_min, dt_max]`.
    pub dt_infinity: f64,
    /// Step used for numeric-differentiation derivative estimates.
    pub dt_nd: f64,
    /// `InfiniteEventLoop` guard: aborts once more than
    /// `max_pass_count_multiplier * n_variables` events fire at one `t`.
    pub max_pass_count_multiplier: usize,
    /// Optional cap reducing `tE` to `tZ - dtZMax` (open question in
    /// spec.md §9 about behavior when `dtZMax > tZ - tX`; we clip the
    /// result to be `>= tX` so `tE` never runs backwards).
    pub dt_z_max: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt_min: 1.0e-10,
            dt_max: 1.0e10,
            dt_infinity: 1.0e10,
            dt_nd: 1.0e-6,
            max_pass_count_multiplier: 100,
            dt_z_max: None,
        }
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    let mut result = 1.0;
    for i in 0..k {
        result *= (n - i) as f64 / (i + 1) as f64;
    }
    result
}

/// Taylor-shift polynomial coefficients from basepoint `0` to a new
/// basepoint offset by `delta`, i.e. re-express `sum c_j * s^j` in terms
/// of `s = delta + s'`. `coeffs` must have at most `MAX_ORDER + 1`
/// entries; the result is padded with zeros beyond `coeffs.len()` and
/// lives on the stack, per spec.md §5's no-per-event-allocation rule.
pub(crate) fn shift_coeffs(coeffs: &[f64], delta: f64) -> [f64; MAX_ORDER + 1] {
    let m = coeffs.len();
    let mut shifted = [0.0; MAX_ORDER + 1];
    for k in 0..m {
        let mut acc = 0.0;
        for j in k..m {
            acc += coeffs[j] * binomial(j, k) * delta.powi((j - k) as i32);
        }
        shifted[k] = acc;
    }
    shifted
}

/// `x(tX + delta) - q(tX + delta)` expressed as polynomial coefficients
/// in `delta`, of length `order + 1`.
fn diff_coeffs(v: &Variable) -> [f64; MAX_ORDER + 1] {
    let order = v.order as usize;
    let q_shifted = shift_coeffs(&v.q[..order], v.t_x - v.t_q);
    let mut diff = [0.0; MAX_ORDER + 1];
    for k in 0..order {
        diff[k] = v.x[k] - q_shifted[k];
    }
    diff[order] = v.x[order];
    diff
}

/// Minimum strictly positive root of `diff(delta) = target`, by degree.
fn min_positive_root(order: usize, diff: &[f64], target: f64) -> f64 {
    match order {
        1 => min_positive_root_linear(diff[1], diff[0] - target),
        2 => min_positive_root_quadratic(diff[2], diff[1], diff[0] - target),
        3 => min_positive_root_cubic(diff[3], diff[2], diff[1], diff[0] - target),
        _ => f64::INFINITY,
    }
}

/// Minimum positive `delta` at which `|diff(delta)| = qTol`.
fn min_positive_crossing_delta(order: usize, diff: &[f64], q_tol: f64) -> f64 {
    let hi = min_positive_root(order, diff, q_tol);
    let lo = min_positive_root(order, diff, -q_tol);
    hi.min(lo)
}

/// Inflection-step refinement (spec.md §4.3 step 7, §8 scenario 6):
/// order 2 caps `tE` at the critical point of `x(t)` when
/// `sign(x1) != sign(x2)`; order 3 caps it at the inflection point of
/// `x(t)` when `sign(x2) != sign(x3)` (grounded on
/// `original_source/src/QSS/VariableQSS3.hh`'s `set_tE_aligned`).
fn inflection_delta(v: &Variable) -> Option<f64> {
    match v.order {
        2 => {
            if v.x[2] != 0.0 && sign(v.x[1]) != sign(v.x[2]) {
                Some(-v.x[1] / (2.0 * v.x[2]))
            } else {
                None
            }
        }
        3 => {
            if v.x[3] != 0.0 && sign(v.x[2]) != sign(v.x[3]) {
                Some(-v.x[2] / (3.0 * v.x[3]))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn clip_dt(dt: f64, config: &SimConfig) -> f64 {
    let dt = if dt.is_infinite() { config.dt_infinity } else { dt };
    dt.max(config.dt_min).min(config.dt_max)
}

/// Predict the next requantization time from the current coefficients,
/// applying the inflection-step cap and `dt` clipping. Equivalent to
/// [`predict_t_e_capped`] with no downstream zero-crossing to respect.
pub fn predict_t_e(v: &Variable, config: &SimConfig) -> f64 {
    predict_t_e_capped(v, config, f64::INFINITY)
}

/// Find the nearest predicted crossing time among `idx`'s zero-crossing
/// computational observers, or `+inf` if it drives none (spec.md §9
/// `dtZMax` knob: a state variable's `tE` should not overshoot a
/// downstream zero-crossing it drives by more than `dtZMax`).
pub fn nearest_driven_t_z(variables: &[Variable], idx: usize) -> f64 {
    variables[idx]
        .computational_observers
        .iter()
        .filter(|o| variables[o.0].kind.is_zero_crossing())
        .map(|o| variables[o.0].t_z)
        .fold(f64::INFINITY, f64::min)
}

/// [`predict_t_e`], additionally capping `tE` to `driving_t_z - dtZMax`
/// when `config.dt_z_max` is set and `driving_t_z` is finite (spec.md §9,
/// resolved open question: when `dtZMax` would push `tE` before `tX`, we
/// clip the cap to zero rather than let `tE` run backwards).
pub fn predict_t_e_capped(v: &Variable, config: &SimConfig, driving_t_z: f64) -> f64 {
    let order = v.order as usize;
    if order == 0 {
        return f64::INFINITY;
    }
    let diff = diff_coeffs(v);
    let mut delta = min_positive_crossing_delta(order, &diff, v.q_tol);
    if let Some(infl) = inflection_delta(v) {
        if infl > 0.0 && infl < delta {
            delta = infl;
        }
    }
    let mut dt = clip_dt(delta, config);
    if let (Some(cap), true) = (config.dt_z_max, driving_t_z.is_finite()) {
        let max_dt = (driving_t_z - cap - v.t_x).max(0.0);
        dt = dt.min(max_dt);
    }
    v.t_x + dt
}

/// Evaluate the continuous trajectory at `t` and roll the variable's
/// coefficients forward so that the new Taylor basepoint is `t`
/// (spec.md §4.3 step 1, §4.4 step 1): `x(t)` becomes the new `x_0`, and
/// `tX` advances to `t`. Higher coefficients are left untouched; callers
/// overwrite them from fresh oracle derivative calls.
pub fn roll_forward(v: &mut Variable, t: f64) {
    let new_x0 = v.x_at(t);
    v.t_x = t;
    v.x[0] = new_x0;
}

/// Whether `v` wants exact Jacobian-vector-product derivatives from the
/// oracle rather than a numeric-differentiation stencil (spec.md §4.3
/// step 4).
fn wants_directional(v: &Variable) -> bool {
    matches!(v.kind, VariableKind::Continuous { derivative_source: DerivativeSource::Directional, .. })
}

/// Second-order Taylor coefficient `x[2] = 0.5 * d(f)/dt` for variable
/// `idx` at `base_t`. When `idx` requests `DerivativeSource::Directional`
/// this is an exact Jacobian-vector product seeded with each observee's
/// (and `idx`'s own) already-known first derivative -- the chain rule,
/// assuming the oracle's right-hand side depends on time only through
/// its observees and itself; otherwise it's a centered numeric-difference
/// stencil at `base_t +/- dtND` (spec.md §4.3 step 4).
pub(crate) fn oracle_second_derivative<O: Oracle>(variables: &[Variable], oracle: &mut O, config: &SimConfig, idx: usize, base_t: f64) -> Result<f64> {
    let var_ref = variables[idx].id;
    if wants_directional(&variables[idx]) {
        // Seed every dependency the RHS can appear in, including `idx`
        // itself (a self-observing variable's derivative depends on its
        // own value too, e.g. Achilles's `dx1/dt = K1*(x2-x1)`).
        let mut seed_refs = variables[idx].computational_observees.clone();
        seed_refs.push(var_ref);
        let mut seed_vals: Vec<f64> = seed_refs[..seed_refs.len() - 1].iter().map(|r| variables[r.0].x[1]).collect();
        seed_vals.push(variables[idx].x[1]);
        let mut out = [0.0f64; 1];
        oracle.directional_derivatives(&seed_refs, &[var_ref], &seed_vals, &mut out)?;
        return Ok(0.5 * out[0]);
    }
    let dt_nd = config.dt_nd;
    let mut scope = Scope::new(oracle, &[var_ref]);
    scope.oracle_mut().set_time(base_t + dt_nd);
    let mut f_plus = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut f_plus)?;
    scope.oracle_mut().set_time(base_t - dt_nd);
    let mut f_minus = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut f_minus)?;
    Ok(0.5 * (f_plus[0] - f_minus[0]) / (2.0 * dt_nd))
}

/// Third-order Taylor coefficient `x[3] = d^2(f)/dt^2 / 6`, same
/// `Directional`/numeric selection as [`oracle_second_derivative`]; the
/// directional case seeds the Jacobian-vector product with each
/// observee's (and `idx`'s own) already-computed second derivative
/// (`2 * x[2]`), which is exact when the right-hand side is linear in
/// its observees and itself.
pub(crate) fn oracle_third_derivative<O: Oracle>(variables: &[Variable], oracle: &mut O, config: &SimConfig, idx: usize, base_t: f64) -> Result<f64> {
    let var_ref = variables[idx].id;
    if wants_directional(&variables[idx]) {
        let mut seed_refs = variables[idx].computational_observees.clone();
        seed_refs.push(var_ref);
        let mut seed_vals: Vec<f64> = seed_refs[..seed_refs.len() - 1].iter().map(|r| 2.0 * variables[r.0].x[2]).collect();
        seed_vals.push(2.0 * variables[idx].x[2]);
        let mut out = [0.0f64; 1];
        oracle.directional_derivatives(&seed_refs, &[var_ref], &seed_vals, &mut out)?;
        return Ok(out[0] / 6.0);
    }
    let dt_nd = config.dt_nd;
    let mut scope = Scope::new(oracle, &[var_ref]);
    scope.oracle_mut().set_time(base_t + 2.0 * dt_nd);
    let mut f_pp = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut f_pp)?;
    scope.oracle_mut().set_time(base_t + dt_nd);
    let mut f_p = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut f_p)?;
    scope.oracle_mut().set_time(base_t);
    let mut f_0 = [0.0f64; 1];
    scope.oracle_mut().derivatives(&[var_ref], &mut f_0)?;
    Ok((f_pp[0] - 2.0 * f_p[0] + f_0[0]) / (dt_nd * dt_nd) / 6.0)
}

/// Push `refs`' current `q`-values into the oracle at time `t`
/// (spec.md §4.3 step 3: "push the current values of all observees").
pub fn push_observee_values<O: Oracle>(oracle: &mut O, variables: &[Variable], refs: &[VariableId], t: f64) {
    oracle.set_time(t);
    for &r in refs {
        let ov = &variables[r.0];
        oracle.set_real(r, ov.q_at(t));
    }
}

/// Single-variable explicit QSS requantization at `tE` (spec.md §4.3).
/// Returns the variable's computational observers, left to the caller
/// (`triggers`/`simulator`) to advance, per the component boundary in
/// spec.md §4.3 step 9.
pub fn requantize_qss<O: Oracle>(
    variables: &mut [Variable],
    oracle: &mut O,
    config: &SimConfig,
    queue: &mut EventQueue,
    idx: usize,
) -> Result<Vec<VariableId>> {
    let t_e = variables[idx].t_e;
    roll_forward(&mut variables[idx], t_e);
    variables[idx].t_q = t_e;

    let observees: Vec<VariableId> = variables[idx].computational_observees.clone();
    push_observee_values(oracle, variables, &observees, t_e);

    let var_ref = variables[idx].id;
    let order = variables[idx].order;

    let mut d1 = [0.0f64; 1];
    oracle.derivatives(&[var_ref], &mut d1)?;
    variables[idx].x[1] = d1[0];

    if order >= 2 {
        variables[idx].x[2] = oracle_second_derivative(variables, oracle, config, idx, t_e)?;
    }
    if order >= 3 {
        variables[idx].x[3] = oracle_third_derivative(variables, oracle, config, idx, t_e)?;
    }

    let order_n = order as usize;
    let x_snapshot = variables[idx].x;
    variables[idx].q[..order_n].copy_from_slice(&x_snapshot[..order_n]);

    variables[idx].recompute_q_tol();
    let driving_t_z = nearest_driven_t_z(variables, idx);
    let new_t_e = predict_t_e_capped(&variables[idx], config, driving_t_z);
    variables[idx].t_e = new_t_e;

    let handle = variables[idx].event_handle.expect("requantized variable must already be scheduled");
    let new_sdt = SuperdenseTime::with_kind(new_t_e, 0, EventKind::Qss);
    let new_handle = queue.shift(handle, new_sdt, None);
    variables[idx].event_handle = Some(new_handle);

    Ok(variables[idx].computational_observers.clone())
}

/// Observer-advance (spec.md §4.4): refresh `v`'s continuous polynomial
/// so it remains accurate after one of its observees requantized,
/// without touching `v.tQ`/`v.q`.
pub fn advance_observer<O: Oracle>(
    variables: &mut [Variable],
    oracle: &mut O,
    config: &SimConfig,
    queue: &mut EventQueue,
    idx: usize,
    t: f64,
) -> Result<()> {
    if variables[idx].kind.is_zero_crossing() {
        // Zero-crossing observers mirror their observee's trajectory
        // rather than integrating their own derivative; delegate to the
        // zero-crossing engine's own predicted-crossing logic.
        return crate::zerocrossing::predict_crossing(variables, oracle, queue, idx, t);
    }
    if variables[idx].t_x >= t {
        return Ok(());
    }
    roll_forward(&mut variables[idx], t);

    let observees: Vec<VariableId> = variables[idx].computational_observees.clone();
    push_observee_values(oracle, variables, &observees, t);

    let var_ref = variables[idx].id;
    let order = variables[idx].order;

    let mut d1 = [0.0f64; 1];
    oracle.derivatives(&[var_ref], &mut d1)?;
    variables[idx].x[1] = d1[0];

    if order >= 2 {
        variables[idx].x[2] = oracle_second_derivative(variables, oracle, config, idx, t)?;
    }
    if order >= 3 {
        variables[idx].x[3] = oracle_third_derivative(variables, oracle, config, idx, t)?;
    }

    let driving_t_z = nearest_driven_t_z(variables, idx);
    let new_t_e = predict_t_e_capped(&variables[idx], config, driving_t_z);
    variables[idx].t_e = new_t_e;
    if let Some(handle) = variables[idx].event_handle {
        let new_sdt = SuperdenseTime::with_kind(new_t_e, 0, EventKind::Qss);
        let new_handle = queue.shift(handle, new_sdt, None);
        variables[idx].event_handle = Some(new_handle);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{DerivativeSource, StateAlgorithm, VariableKind};

    fn make_order2() -> Variable {
        let mut v = Variable::new(
            VariableId(0),
            "x",
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            2,
            100.0,
            1.0,
            0.0,
        );
        v.q_tol = 1.0;
        v
    }

    #[test]
    fn aligned_quadratic_matches_reference_formula() {
        // Aligned: tQ == tX, q == x truncated. x2 = 0.5 -> tE = tQ + sqrt(qTol/|x2|)
        let mut v = make_order2();
        v.t_x = 0.0;
        v.t_q = 0.0;
        v.x = [0.0, 1.0, 0.5, 0.0];
        v.q = [0.0, 1.0, 0.0];
        v.q_tol = 1.0;
        let config = SimConfig::default();
        let t_e = predict_t_e(&v, &config);
        let expected = (1.0_f64 / 0.5).sqrt();
        assert!((t_e - expected).abs() < 1e-9, "t_e={t_e} expected={expected}");
    }

    #[test]
    fn zero_derivative_falls_back_to_dt_max() {
        let mut v = make_order2();
        v.t_x = 0.0;
        v.t_q = 0.0;
        v.x = [0.0, 0.0, 0.0, 0.0];
        v.q = [0.0, 0.0, 0.0];
        let mut config = SimConfig::default();
        config.dt_max = 50.0;
        let t_e = predict_t_e(&v, &config);
        assert!((t_e - 50.0).abs() < 1e-9);
    }

    #[test]
    fn inflection_step_caps_order2() {
        let mut v = make_order2();
        v.t_x = 0.0;
        v.t_q = 0.0;
        // x1 positive, x2 negative opposite sign -> inflection at -x1/(2*x2)
        v.x = [0.0, 2.0, -1.0, 0.0];
        v.q = [0.0, 2.0, 0.0];
        v.q_tol = 1000.0; // make the quantum crossing time far away
        let config = SimConfig::default();
        let t_e = predict_t_e(&v, &config);
        let infl = -2.0 / (2.0 * -1.0);
        assert!((t_e - infl).abs() < 1e-9, "t_e={t_e} infl={infl}");
    }

    #[test]
    fn roll_forward_updates_basepoint_and_value() {
        let mut v = make_order2();
        v.t_x = 0.0;
        v.x = [1.0, 2.0, 0.0, 0.0];
        roll_forward(&mut v, 3.0);
        assert_eq!(v.t_x, 3.0);
        assert!((v.x[0] - 7.0).abs() < 1e-12);
    }

    #[test]
    fn dt_z_max_caps_t_e_below_driven_crossing() {
        let mut v = make_order2();
        v.t_x = 0.0;
        v.t_q = 0.0;
        v.x = [0.0, 1.0, 0.0, 0.0];
        v.q = [0.0, 1.0, 0.0];
        v.q_tol = 1000.0; // quantum crossing far away; dtZMax should dominate
        let mut config = SimConfig::default();
        config.dt_z_max = Some(0.5);
        let uncapped = predict_t_e_capped(&v, &config, f64::INFINITY);
        assert!(uncapped >= config.dt_max);
        let capped = predict_t_e_capped(&v, &config, 2.0);
        assert!((capped - 1.5).abs() < 1e-9, "capped={capped}");
    }

    #[test]
    fn dt_z_max_never_runs_t_e_backwards() {
        let mut v = make_order2();
        v.t_x = 0.0;
        v.t_q = 0.0;
        v.x = [0.0, 1.0, 0.0, 0.0];
        v.q = [0.0, 1.0, 0.0];
        v.q_tol = 1000.0;
        let mut config = SimConfig::default();
        config.dt_z_max = Some(5.0);
        let capped = predict_t_e_capped(&v, &config, 1.0);
        assert!((capped - v.t_x).abs() < 1e-12);
    }
}
