//! The derivative oracle interface (spec.md §6.1): the abstraction over
//! the external model that the core never allocates or owns.
//!
//! `Scope` implements the save/restore stack discipline required around
//! numeric-differentiation bumps and LIQSS/zero-crossing candidate
//! evaluation (spec.md §5, §9): its `Drop` impl restores the oracle's
//! time and the touched variable refs on every exit path, including a
//! panic unwind.

use crate::error::Result;
use crate::variable::VariableId;

/// Opaque reference to a model variable, as understood by the oracle.
/// Reuses the core's `VariableId` since the reference solver's FMU
/// value-reference space and the core's variable arena index coincide
/// one-to-one after model-metadata import.
pub type VarRef = VariableId;

/// Abstraction over the external model (spec.md §6.1). Implementations
/// live outside the core (the reference oracle lives in `qss-engine`).
pub trait Oracle {
    fn time(&self) -> f64;
    fn set_time(&mut self, t: f64);

    fn get_real(&self, r: VarRef) -> f64;
    fn set_real(&mut self, r: VarRef, v: f64);

    fn get_reals(&self, refs: &[VarRef], out: &mut [f64]) {
        for (r, o) in refs.iter().zip(out.iter_mut()) {
            *o = self.get_real(*r);
        }
    }
    fn set_reals(&mut self, refs: &[VarRef], vals: &[f64]) {
        for (r, v) in refs.iter().zip(vals.iter()) {
            self.set_real(*r, *v);
        }
    }

    fn get_integer(&self, r: VarRef) -> i64;
    fn set_integer(&mut self, r: VarRef, v: i64);
    fn get_boolean(&self, r: VarRef) -> bool;
    fn set_boolean(&mut self, r: VarRef, v: bool);

    /// Time-derivatives of `state_refs` at the oracle's current time and
    /// values, written into `out` (same length as `state_refs`).
    fn derivatives(&self, state_refs: &[VarRef], out: &mut [f64]) -> Result<()>;

    /// Jacobian-vector product of `output_refs` with respect to a unit
    /// seed on `seed_refs` (the seed values themselves are supplied in
    /// `seed_vals`, one per `seed_refs` entry); written into `out_vals`.
    fn directional_derivatives(
        &self,
        seed_refs: &[VarRef],
        output_refs: &[VarRef],
        seed_vals: &[f64],
        out_vals: &mut [f64],
    ) -> Result<()>;

    /// Enter event-mode / begin handler iteration.
    fn do_event_iteration(&mut self);
    /// Exit event-mode after a completed integrator step.
    fn completed_integrator_step(&mut self);

    /// Current values of every event-indicator variable.
    fn get_event_indicators(&self, out: &mut [f64]);
}

/// RAII scope that snapshots the oracle's time and a set of variable
/// refs on entry and restores them on drop, giving numeric-
/// differentiation bumps and LIQSS candidate evaluation a clean stack
/// discipline (spec.md §5, §9).
pub struct Scope<'o, O: Oracle + ?Sized> {
    oracle: &'o mut O,
    saved_time: f64,
    saved_refs: Vec<VarRef>,
    saved_vals: Vec<f64>,
}

impl<'o, O: Oracle + ?Sized> Scope<'o, O> {
    pub fn new(oracle: &'o mut O, refs: &[VarRef]) -> Self {
        let saved_time = oracle.time();
        let mut saved_vals = vec![0.0; refs.len()];
        oracle.get_reals(refs, &mut saved_vals);
        Self { oracle, saved_time, saved_refs: refs.to_vec(), saved_vals }
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        self.oracle
    }
}

impl<'o, O: Oracle + ?Sized> Drop for Scope<'o, O> {
    fn drop(&mut self) {
        self.oracle.set_reals(&self.saved_refs, &self.saved_vals);
        self.oracle.set_time(self.saved_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Minimal in-memory oracle for exercising `Scope`'s save/restore
    /// discipline without pulling in `qss-engine`.
    struct FakeOracle {
        t: f64,
        reals: RefCell<HashMap<usize, f64>>,
    }

    impl Oracle for FakeOracle {
        fn time(&self) -> f64 {
            self.t
        }
        fn set_time(&mut self, t: f64) {
            self.t = t;
        }
        fn get_real(&self, r: VarRef) -> f64 {
            *self.reals.borrow().get(&r.0).unwrap_or(&0.0)
        }
        fn set_real(&mut self, r: VarRef, v: f64) {
            self.reals.borrow_mut().insert(r.0, v);
        }
        fn get_integer(&self, _r: VarRef) -> i64 {
            0
        }
        fn set_integer(&mut self, _r: VarRef, _v: i64) {}
        fn get_boolean(&self, _r: VarRef) -> bool {
            false
        }
        fn set_boolean(&mut self, _r: VarRef, _v: bool) {}
        fn derivatives(&self, _state_refs: &[VarRef], _out: &mut [f64]) -> Result<()> {
            Ok(())
        }
        fn directional_derivatives(
            &self,
            _seed_refs: &[VarRef],
            _output_refs: &[VarRef],
            _seed_vals: &[f64],
            _out_vals: &mut [f64],
        ) -> Result<()> {
            Ok(())
        }
        fn do_event_iteration(&mut self) {}
        fn completed_integrator_step(&mut self) {}
        fn get_event_indicators(&self, _out: &mut [f64]) {}
    }

    #[test]
    fn scope_restores_time_and_values_on_drop() {
        let mut oracle = FakeOracle { t: 1.0, reals: RefCell::new(HashMap::new()) };
        oracle.set_real(VariableId(0), 5.0);
        {
            let mut scope = Scope::new(&mut oracle, &[VariableId(0)]);
            scope.oracle_mut().set_time(99.0);
            scope.oracle_mut().set_real(VariableId(0), 1234.0);
            assert_eq!(scope.oracle_mut().get_real(VariableId(0)), 1234.0);
        }
        assert_eq!(oracle.time(), 1.0);
        assert_eq!(oracle.get_real(VariableId(0)), 5.0);
    }
}
