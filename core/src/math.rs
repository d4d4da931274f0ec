//! Polynomial evaluation, signum, and minimum-positive-root finders.
//!
//! The root finders return `f64::INFINITY` for "no positive root" rather
//! than a sentinel magic number, matching the reference solver's
//! `min_root_quadratic`/`min_root_cubic` behavior.

/// Signum with an explicit zero case (unlike `f64::signum`, which returns
/// `+1.0` for `0.0`).
pub fn sign(x: f64) -> i32 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Evaluate a polynomial `sum_{k} c[k] * delta^k` via Horner's method.
pub fn poly_eval(coeffs: &[f64], delta: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * delta + c)
}

/// Minimum strictly positive root of `c1*t + c0 = 0`, or `+inf` if none.
pub fn min_positive_root_linear(c1: f64, c0: f64) -> f64 {
    if c1 == 0.0 {
        return f64::INFINITY;
    }
    let t = -c0 / c1;
    if t > 0.0 {
        t
    } else {
        f64::INFINITY
    }
}

/// Minimum strictly positive root of `c2*t^2 + c1*t + c0 = 0`, or `+inf`.
///
/// Falls back to the linear solver when `c2` is (numerically) zero so
/// that near-flat trajectories don't lose precision to cancellation.
pub fn min_positive_root_quadratic(c2: f64, c1: f64, c0: f64) -> f64 {
    if c2 == 0.0 {
        return min_positive_root_linear(c1, c0);
    }
    let disc = c1 * c1 - 4.0 * c2 * c0;
    if disc < 0.0 {
        return f64::INFINITY;
    }
    let sqrt_disc = disc.sqrt();
    let r1 = (-c1 + sqrt_disc) / (2.0 * c2);
    let r2 = (-c1 - sqrt_disc) / (2.0 * c2);
    let mut best = f64::INFINITY;
    for r in [r1, r2] {
        if r > 0.0 && r < best {
            best = r;
        }
    }
    best
}

/// Minimum strictly positive root of `c3*t^3 + c2*t^2 + c1*t + c0 = 0`.
///
/// Uses Cardano's method with a trigonometric solve in the three-real-root
/// case; falls back to the quadratic solver when `c3` is zero.
pub fn min_positive_root_cubic(c3: f64, c2: f64, c1: f64, c0: f64) -> f64 {
    if c3 == 0.0 {
        return min_positive_root_quadratic(c2, c1, c0);
    }
    let a = c2 / c3;
    let b = c1 / c3;
    let c = c0 / c3;

    let q = (3.0 * b - a * a) / 9.0;
    let r = (9.0 * a * b - 27.0 * c - 2.0 * a * a * a) / 54.0;
    let disc = q * q * q + r * r;
    let a3 = a / 3.0;

    let mut best = f64::INFINITY;
    let mut consider = |t: f64| {
        if t > 0.0 && t < best {
            best = t;
        }
    };

    if disc > 0.0 {
        // One real root.
        let sqrt_disc = disc.sqrt();
        let s = cbrt(r + sqrt_disc);
        let t = cbrt(r - sqrt_disc);
        consider(s + t - a3);
    } else if disc == 0.0 {
        // Repeated real roots.
        let s = cbrt(r);
        consider(2.0 * s - a3);
        consider(-s - a3);
    } else {
        // Three distinct real roots.
        let theta = (r / (-q * q * q).sqrt()).clamp(-1.0, 1.0).acos();
        let sqrt_neg_q = (-q).sqrt();
        let two_pi = std::f64::consts::TAU;
        for k in 0..3 {
            let root = 2.0 * sqrt_neg_q * ((theta + two_pi * k as f64) / 3.0).cos() - a3;
            consider(root);
        }
    }
    best
}

fn cbrt(x: f64) -> f64 {
    if x >= 0.0 {
        x.powf(1.0 / 3.0)
    } else {
        -(-x).powf(1.0 / 3.0)
    }
}
