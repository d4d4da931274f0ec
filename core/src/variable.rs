//! The variable model: polynomial trajectories, quantized projections,
//! and the tagged-variant collapse of the reference solver's deep
//! per-order/per-algorithm class hierarchy (spec.md §3.2, §9).

use serde::{Deserialize, Serialize};

use crate::math::poly_eval;
use crate::queue::EventHandle;

/// Arena index into the variable set. Observee/observer edges store ids
/// rather than raw references, so the graph has no cyclic borrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub usize);

/// Cluster id for a strongly-connected group of state variables that
/// must requantize together (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub usize);

/// Whether a state variable is driven by the explicit QSS formula or by
/// LIQSS's hysteretic self-observer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateAlgorithm {
    Qss,
    Liqss,
}

/// How higher-order derivatives are obtained from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivativeSource {
    /// Dedicated directional-derivative oracle call.
    Directional,
    /// Centered numeric difference at `tE +/- dtND`.
    NumericCentered,
    /// Forward numeric difference at `tE`, `tE+dtND`, `tE+2*dtND` (used
    /// at simulation start, where a centered stencil isn't available).
    NumericForward,
}

/// The collapsed variant tag replacing the reference solver's per-order,
/// per-algorithm class hierarchy (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// A QSS/LIQSS state of order 1, 2, or 3.
    Continuous { algorithm: StateAlgorithm, derivative_source: DerivativeSource },
    /// Value changes only at handler events.
    Discrete,
    /// Function-of-time input. `discrete` selects whether the input is
    /// QSS-quantized or purely discrete (tD-driven).
    Input { discrete: bool },
    /// Event-indicator variable tracked by the zero-crossing engine.
    ZeroCrossing,
    /// Order-1 algebraic follower of an oracle-defined real signal.
    RealPassthrough,
    /// Passive mirror of another subsystem's output.
    Connection,
}

impl VariableKind {
    pub fn is_state(self) -> bool {
        matches!(self, VariableKind::Continuous { .. })
    }

    pub fn is_zero_crossing(self) -> bool {
        matches!(self, VariableKind::ZeroCrossing)
    }
}

/// Signed zero-crossing transition kinds (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingType {
    DnPN,
    DnPZ,
    DnZN,
    Flat,
    UpZP,
    UpNZ,
    UpNP,
    Up,
    Dn,
}

impl CrossingType {
    /// Classify a sign transition `before -> after` (using `math::sign`
    /// convention: -1, 0, +1).
    pub fn classify(before: i32, after: i32) -> Option<CrossingType> {
        use CrossingType::*;
        match (before, after) {
            (1, -1) => Some(DnPN),
            (1, 0) => Some(DnPZ),
            (0, -1) => Some(DnZN),
            (0, 0) => Some(Flat),
            (0, 1) => Some(UpZP),
            (-1, 0) => Some(UpNZ),
            (-1, 1) => Some(UpNP),
            _ => None,
        }
    }

    /// Whether this concrete transition matches a (possibly
    /// bidirectional) relevant-crossing-type entry.
    pub fn matches(self, relevant: CrossingType) -> bool {
        use CrossingType::*;
        if self == relevant {
            return true;
        }
        match relevant {
            Up => matches!(self, UpZP | UpNZ | UpNP),
            Dn => matches!(self, DnPN | DnPZ | DnZN),
            _ => false,
        }
    }
}

/// Zero-crossing-only bookkeeping (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct ZeroCrossingState {
    pub relevant: Vec<CrossingType>,
    pub x_mag: f64,
    pub t_z_last: f64,
    pub handler_id: Option<usize>,
    pub sign_before: i32,
}

impl ZeroCrossingState {
    pub fn new(relevant: Vec<CrossingType>, handler_id: Option<usize>) -> Self {
        Self { relevant, x_mag: 0.0, t_z_last: f64::NEG_INFINITY, handler_id, sign_before: 0 }
    }
}

/// Maximum polynomial order supported (QSS3 / LIQSS3): continuous
/// coefficients `x[0..=3]`, quantized coefficients `q[0..=2]`.
pub const MAX_ORDER: usize = 3;

/// A numbered polymorphic simulation entity holding trajectory
/// coefficients, tolerances, and event-queue linkage (spec.md §3.2).
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub kind: VariableKind,
    pub order: u8,

    pub r_tol: f64,
    pub a_tol: f64,
    pub z_tol: f64,
    pub q_tol: f64,

    pub t_q: f64,
    pub t_x: f64,
    pub t_e: f64,
    pub t_z: f64,
    pub t_d: f64,

    /// Continuous trajectory coefficients, basepoint `t_x`, up to `order`.
    pub x: [f64; MAX_ORDER + 1],
    /// Quantized trajectory coefficients, basepoint `t_q`, up to `order-1`.
    pub q: [f64; MAX_ORDER],

    /// Raw "reads from" edges, sorted by id and deduplicated at finalize.
    pub observees: Vec<VariableId>,
    /// Raw "is read by" edges, sorted by id and deduplicated at finalize.
    pub observers: Vec<VariableId>,
    /// Transitive closure through passive pass-throughs (spec.md §3.4).
    pub computational_observees: Vec<VariableId>,
    pub computational_observers: Vec<VariableId>,

    pub self_observer: bool,
    pub event_handle: Option<EventHandle>,
    pub cluster: Option<ClusterId>,

    pub zero_crossing: Option<ZeroCrossingState>,

    /// Handler-variable set this variable's handler controls, if it is a
    /// zero-crossing bound to a conditional block.
    pub handler_variables: Vec<VariableId>,
}

impl Variable {
    pub fn new(id: VariableId, name: impl Into<String>, kind: VariableKind, order: u8, r_tol: f64, a_tol: f64, z_tol: f64) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            order,
            r_tol,
            a_tol,
            z_tol,
            q_tol: a_tol,
            t_q: 0.0,
            t_x: 0.0,
            t_e: 0.0,
            t_z: f64::INFINITY,
            t_d: f64::INFINITY,
            x: [0.0; MAX_ORDER + 1],
            q: [0.0; MAX_ORDER],
            observees: Vec::new(),
            observers: Vec::new(),
            computational_observees: Vec::new(),
            computational_observers: Vec::new(),
            self_observer: false,
            event_handle: None,
            cluster: None,
            zero_crossing: if kind.is_zero_crossing() {
                Some(ZeroCrossingState::new(vec![CrossingType::Up, CrossingType::Dn], None))
            } else {
                None
            },
            handler_variables: Vec::new(),
        }
    }

    /// Continuous value `x(t) = sum_{k=0..=order} x_k * (t - tX)^k`.
    pub fn x_at(&self, t: f64) -> f64 {
        let n = self.order as usize + 1;
        poly_eval(&self.x[..n], t - self.t_x)
    }

    /// `k`-th continuous derivative at `t` (Taylor expansion from `tX`).
    pub fn x_deriv_at(&self, k: usize, t: f64) -> f64 {
        let n = self.order as usize + 1;
        if k >= n {
            return 0.0;
        }
        let delta = t - self.t_x;
        let mut acc = 0.0;
        let mut fact = 1.0;
        for j in 1..=k {
            fact *= j as f64;
        }
        // derivative coefficients: d^k/dt^k [x_j * delta^j] = j!/(j-k)! * x_j * delta^(j-k)
        for j in k..n {
            let mut perm = 1.0;
            for m in (j - k + 1..=j).rev() {
                perm *= m as f64;
            }
            acc += perm * self.x[j] * delta.powi((j - k) as i32);
        }
        let _ = fact;
        acc
    }

    /// Quantized value `q(t)`, one order lower than the continuous rep.
    pub fn q_at(&self, t: f64) -> f64 {
        if self.order == 0 {
            return self.q[0];
        }
        let n = self.order as usize;
        poly_eval(&self.q[..n], t - self.t_q)
    }

    /// `qTol = max(rTol*|q0|, aTol)`, per spec.md §3.2.
    pub fn recompute_q_tol(&mut self) {
        self.q_tol = (self.r_tol * self.q[0].abs()).max(self.a_tol);
    }

    /// Sort and dedup the raw observee/observer sets (finalize step).
    pub fn finalize_raw_edges(&mut self) {
        self.observees.sort_unstable();
        self.observees.dedup();
        self.observers.sort_unstable();
        self.observers.dedup();
        self.self_observer = self.observees.contains(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qss2_var() -> Variable {
        let mut v = Variable::new(
            VariableId(0),
            "x",
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            2,
            1e-4,
            1e-6,
            0.0,
        );
        v.t_x = 0.0;
        v.x[0] = 1.0;
        v.x[1] = 2.0;
        v.x[2] = 3.0;
        v
    }

    #[test]
    fn x_at_matches_taylor_polynomial() {
        let v = qss2_var();
        // x(2) = 1 + 2*2 + 3*4 = 17
        assert!((v.x_at(2.0) - 17.0).abs() < 1e-12);
    }

    #[test]
    fn first_derivative_matches_polynomial_derivative() {
        let v = qss2_var();
        // x'(t) = 2 + 6*delta ; at delta=2 -> 14
        assert!((v.x_deriv_at(1, 2.0) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn second_derivative_is_constant_for_order2() {
        let v = qss2_var();
        // x''(t) = 2*3 = 6, constant
        assert!((v.x_deriv_at(2, 0.0) - 6.0).abs() < 1e-12);
        assert!((v.x_deriv_at(2, 5.0) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn q_tol_invariant() {
        let mut v = qss2_var();
        v.q[0] = 10.0;
        v.recompute_q_tol();
        assert!((v.q_tol - (v.r_tol * 10.0).max(v.a_tol)).abs() < 1e-15);
    }

    #[test]
    fn crossing_type_classification() {
        assert_eq!(CrossingType::classify(1, -1), Some(CrossingType::DnPN));
        assert_eq!(CrossingType::classify(-1, 1), Some(CrossingType::UpNP));
        assert_eq!(CrossingType::classify(0, 0), Some(CrossingType::Flat));
        assert!(CrossingType::UpNP.matches(CrossingType::Up));
        assert!(CrossingType::DnPN.matches(CrossingType::Dn));
        assert!(!CrossingType::UpNP.matches(CrossingType::Dn));
    }

    #[test]
    fn finalize_sorts_and_dedups_observees() {
        let mut v = qss2_var();
        v.observees = vec![VariableId(3), VariableId(1), VariableId(1), VariableId(0)];
        v.finalize_raw_edges();
        assert_eq!(v.observees, vec![VariableId(0), VariableId(1), VariableId(3)]);
        assert!(v.self_observer);
    }
}
