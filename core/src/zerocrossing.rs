//! Zero-crossing engine: predicted/unpredicted crossing detection,
//! chatter suppression, Newton refinement, and handler dispatch
//! (spec.md §4.6).

use crate::error::Result;
use crate::math::{min_positive_root_cubic, min_positive_root_linear, min_positive_root_quadratic, poly_eval, sign};
use crate::oracle::Oracle;
use crate::queue::EventQueue;
use crate::requant::{oracle_second_derivative, oracle_third_derivative, push_observee_values, roll_forward, shift_coeffs, SimConfig};
use crate::superdense::{EventKind, SuperdenseTime};
use crate::variable::{CrossingType, Variable, VariableId, MAX_ORDER};

const MAX_NEWTON_STEPS: usize = 10;

/// Minimum positive root of `z.x(delta) = 0`, by polynomial degree.
fn min_positive_zero(order: usize, coeffs: &[f64]) -> f64 {
    match order {
        0 => f64::INFINITY,
        1 => min_positive_root_linear(coeffs[1], coeffs[0]),
        2 => min_positive_root_quadratic(coeffs[2], coeffs[1], coeffs[0]),
        _ => min_positive_root_cubic(coeffs[3], coeffs[2], coeffs[1], coeffs[0]),
    }
}

/// Up to `MAX_NEWTON_STEPS` damped Newton refinements of a root guess
/// `delta` against the polynomial `coeffs` (basepoint-relative), stopping
/// once `|f| <= a_tol` or the residual stops decreasing (spec.md §4.6
/// step 4).
fn newton_refine(coeffs: &[f64], mut delta: f64, a_tol: f64) -> f64 {
    if !delta.is_finite() {
        return delta;
    }
    let order = coeffs.len() - 1;
    let mut deriv = [0.0; MAX_ORDER];
    for k in 1..=order {
        deriv[k - 1] = coeffs[k] * k as f64;
    }
    let mut last_residual = poly_eval(coeffs, delta).abs();
    for _ in 0..MAX_NEWTON_STEPS {
        let f = poly_eval(coeffs, delta);
        if f.abs() <= a_tol {
            break;
        }
        let fp = poly_eval(&deriv[..order], delta);
        if fp == 0.0 {
            break;
        }
        let step = f / fp;
        let mut damping = 1.0;
        let mut candidate = delta - step * damping;
        let mut residual = poly_eval(coeffs, candidate).abs();
        while residual > last_residual && damping > 1.0e-4 {
            damping *= 0.5;
            candidate = delta - step * damping;
            residual = poly_eval(coeffs, candidate).abs();
        }
        if residual > last_residual {
            break;
        }
        delta = candidate;
        last_residual = residual;
    }
    delta
}

/// Predict the next relevant crossing time for `z` after a
/// requantization roll-forward (spec.md §4.6 steps 1-4).
pub fn predict_crossing<O: Oracle>(
    variables: &mut [Variable],
    oracle: &mut O,
    queue: &mut EventQueue,
    idx: usize,
    t: f64,
) -> Result<()> {
    let x0_before = variables[idx].x[0];
    if let Some(zc) = variables[idx].zero_crossing.as_mut() {
        zc.sign_before = sign(x0_before);
    }

    roll_forward(&mut variables[idx], t);
    let observees: Vec<VariableId> = variables[idx].computational_observees.clone();
    push_observee_values(oracle, variables, &observees, t);

    // A zero-crossing variable mirrors its single observee's trajectory
    // rather than integrating its own derivative (spec.md §4.6: the event
    // indicator's value is a direct function of model state, grounded on
    // `original_source/src/QSS/cod/mdl/bball.cc`'s `z->add(h)` wiring).
    let order = variables[idx].order as usize;
    if let Some(&obs) = observees.first() {
        let obs_order = variables[obs.0].order as usize;
        let n = order.min(obs_order) + 1;
        let delta = t - variables[obs.0].t_x;
        let shifted = shift_coeffs(&variables[obs.0].x[..n], delta);
        variables[idx].x[..n].copy_from_slice(&shifted[..n]);
    }
    let mut coeffs = [0.0; MAX_ORDER + 1];
    coeffs[..=order].copy_from_slice(&variables[idx].x[..=order]);

    let mut delta = min_positive_zero(order, &coeffs);
    let a_tol = variables[idx].a_tol;
    delta = newton_refine(&coeffs[..=order], delta, a_tol);

    let t_z_candidate = if delta.is_finite() { t + delta } else { f64::INFINITY };

    let relevant_ok = if delta.is_finite() {
        let before_sign = sign(poly_eval(&coeffs, 0.0));
        let after_sign = sign(poly_eval(&coeffs, delta));
        match CrossingType::classify(before_sign, after_sign) {
            Some(kind) => {
                let zc = variables[idx].zero_crossing.as_ref().expect("zero-crossing state must be present");
                zc.relevant.iter().any(|&r| kind.matches(r))
            }
            None => false,
        }
    } else {
        false
    };

    let t_z = if relevant_ok { t_z_candidate } else { f64::INFINITY };

    if let Some(zc) = variables[idx].zero_crossing.as_mut() {
        let mag = coeffs[0].abs().max(zc.x_mag);
        zc.x_mag = mag;
        if zc.x_mag < variables[idx].z_tol {
            variables[idx].t_z = f64::INFINITY;
        } else {
            variables[idx].t_z = t_z;
        }
    }

    reschedule(variables, queue, idx);
    Ok(())
}

/// Re-derive the event-queue entry's superdense time as `min(tE, tZ)`,
/// using zero-crossing kind if `tZ` wins (spec.md §4.6 step 5).
fn reschedule(variables: &mut [Variable], queue: &mut EventQueue, idx: usize) {
    let t_e = variables[idx].t_e;
    let t_z = variables[idx].t_z;
    let (t, kind) = if t_z < t_e { (t_z, EventKind::ZeroCrossing) } else { (t_e, EventKind::Qss) };
    if let Some(handle) = variables[idx].event_handle {
        let new_sdt = SuperdenseTime::with_kind(t, 0, kind);
        let new_handle = queue.shift(handle, new_sdt, Some(kind));
        variables[idx].event_handle = Some(new_handle);
    }
}

/// Detect an unpredicted crossing after an observer-advance of `z`
/// (spec.md §4.6 "Unpredicted crossing"): compare sign before/after the
/// roll-forward and, if the transition is relevant, shift `tZ` to `t`
/// immediately.
pub fn check_unpredicted_crossing(variables: &mut [Variable], queue: &mut EventQueue, idx: usize, t: f64) {
    let before = sign(variables[idx].x_at(variables[idx].t_x));
    let after = sign(variables[idx].x_at(t));
    if before == after {
        return;
    }
    let relevant_ok = match CrossingType::classify(before, after) {
        Some(kind) => {
            let zc = variables[idx].zero_crossing.as_ref().expect("zero-crossing state must be present");
            zc.relevant.iter().any(|&r| kind.matches(r))
        }
        None => false,
    };
    if relevant_ok {
        variables[idx].t_z = t;
        reschedule(variables, queue, idx);
    }
}

/// Invoke the handler bound to zero-crossing `z` at `tZ`, then
/// re-initialize its handler variables and advance their observers
/// (spec.md §4.6 "Zero-crossing handler dispatch"). The handler's actual
/// side effects happen inside the oracle; this just runs the
/// re-initialization bookkeeping the core owns.
pub fn dispatch_handler<O: Oracle>(variables: &mut [Variable], oracle: &mut O, config: &SimConfig, queue: &mut EventQueue, zc_idx: usize, t_z: f64) -> Result<Vec<VariableId>> {
    let observees: Vec<VariableId> = variables[zc_idx].computational_observees.clone();
    push_observee_values(oracle, variables, &observees, t_z);
    oracle.do_event_iteration();

    let handler_vars: Vec<VariableId> = variables[zc_idx].handler_variables.clone();
    for &hv in &handler_vars {
        let i = hv.0;
        variables[i].t_q = t_z;
        variables[i].t_x = t_z;
        variables[i].x[0] = oracle.get_real(hv);
        for k in 1..variables[i].x.len() {
            variables[i].x[k] = 0.0;
        }
        let order = variables[i].order as usize;
        if order >= 1 {
            let mut d1 = [0.0f64; 1];
            oracle.derivatives(&[hv], &mut d1)?;
            variables[i].x[1] = d1[0];
        }
        if order >= 2 {
            variables[i].x[2] = oracle_second_derivative(variables, oracle, config, i, t_z)?;
        }
        if order >= 3 {
            variables[i].x[3] = oracle_third_derivative(variables, oracle, config, i, t_z)?;
        }
        variables[i].q[..order].copy_from_slice(&variables[i].x[..order]);
        variables[i].recompute_q_tol();
        let driving_t_z = crate::requant::nearest_driven_t_z(variables, i);
        let new_t_e = crate::requant::predict_t_e_capped(&variables[i], config, driving_t_z);
        variables[i].t_e = new_t_e;
        if let Some(handle) = variables[i].event_handle {
            let new_sdt = SuperdenseTime::with_kind(new_t_e, 0, EventKind::Qss);
            let new_handle = queue.shift(handle, new_sdt, None);
            variables[i].event_handle = Some(new_handle);
        }
    }

    oracle.completed_integrator_step();

    if let Some(zc) = variables[zc_idx].zero_crossing.as_mut() {
        zc.x_mag = 0.0;
        zc.t_z_last = t_z;
    }
    variables[zc_idx].t_z = f64::INFINITY;
    reschedule(variables, queue, zc_idx);

    let mut observers: Vec<VariableId> = handler_vars
        .iter()
        .flat_map(|hv| variables[hv.0].computational_observers.iter().copied())
        .collect();
    observers.sort_unstable();
    observers.dedup();
    Ok(observers)
}

/// FMU-style bump time used when the oracle requires perturbing past the
/// crossing to resolve the transition (spec.md §4.6, "FMU-style crossing
/// detection"): `t + k*zTol/|x_1|`, order-specific `k`.
pub fn fmu_bump_time(v: &Variable, t: f64, k: f64) -> f64 {
    let x1 = v.x[1];
    if x1 == 0.0 {
        return t;
    }
    t + k * v.z_tol / x1.abs()
}
