//! The top-level driver: `Simulator<O>` owns the variable arena and
//! event queue and runs the main loop (SPEC_FULL.md §4.10, grounded on
//! `original_source/app/QSS.cc`'s top-level simulate loop).

use crate::dependency::{compute_computational_closures, detect_state_clusters, verify_observer_consistency};
use crate::error::{QssError, Result};
use crate::liqss::{requantize_liqss, ObserveeRep};
use crate::oracle::Oracle;
use crate::queue::{EventQueue, QueueItem};
use crate::requant::{advance_observer, requantize_qss, SimConfig};
use crate::superdense::{EventKind, SuperdenseTime};
use crate::triggers::{expand_with_clusters, run_simultaneous_trigger_group, TriggerScratch};
use crate::variable::{StateAlgorithm, Variable, VariableId, VariableKind};
use crate::zerocrossing::{check_unpredicted_crossing, dispatch_handler, predict_crossing};

/// Per-kind event counters and other end-of-run diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub final_time: f64,
    pub discrete_events: u64,
    pub qss_events: u64,
    pub zero_crossing_events: u64,
    pub handler_events: u64,
}

/// Owning driver for one simulation run.
pub struct Simulator<O: Oracle> {
    pub variables: Vec<Variable>,
    pub queue: EventQueue,
    pub oracle: O,
    pub config: SimConfig,
    pub t_start: f64,
    pub t_end: f64,
    pub max_events: Option<u64>,
    report: SimulationReport,
    events_at_current_t: u64,
    current_t_marker: f64,
    scratch: TriggerScratch,
}

impl<O: Oracle> Simulator<O> {
    /// A snapshot of the run's event counters so far (valid mid-run, not
    /// just after `run()` returns — used by callers driving the loop via
    /// [`Self::step`]).
    pub fn report(&self) -> SimulationReport {
        self.report.clone()
    }

    pub fn new(variables: Vec<Variable>, oracle: O, config: SimConfig, t_start: f64, t_end: f64) -> Self {
        Self {
            variables,
            queue: EventQueue::new(),
            oracle,
            config,
            t_start,
            t_end,
            max_events: None,
            report: SimulationReport::default(),
            events_at_current_t: 0,
            current_t_marker: f64::NEG_INFINITY,
            scratch: TriggerScratch::default(),
        }
    }

    /// Finalize the dependency graph and run the pass-0 initialization
    /// trigger group over every variable at `t_start` (SPEC_FULL.md
    /// §4.10 step 1).
    pub fn initialize(&mut self) -> Result<()> {
        for v in self.variables.iter_mut() {
            v.finalize_raw_edges();
        }
        compute_computational_closures(&mut self.variables);
        verify_observer_consistency(&self.variables)?;
        detect_state_clusters(&mut self.variables);

        for i in 0..self.variables.len() {
            let kind = self.variables[i].kind;
            let name = self.variables[i].name.clone();
            let sdt = SuperdenseTime::with_kind(self.t_start, 0, event_kind_for(kind));
            let handle = self.queue.add(sdt, VariableId(i), &name, event_kind_for(kind));
            self.variables[i].event_handle = Some(handle);
            self.variables[i].t_x = self.t_start;
            self.variables[i].t_q = self.t_start;
            self.variables[i].t_e = self.t_start;
        }

        self.scratch = TriggerScratch::with_capacity(self.variables.len());
        let all_ids: Vec<VariableId> = (0..self.variables.len()).map(VariableId).collect();
        run_simultaneous_trigger_group(
            &mut self.variables,
            &mut self.oracle,
            &self.config,
            &mut self.queue,
            &mut self.scratch,
            &all_ids,
            self.t_start,
        )?;
        Ok(())
    }

    /// Run until `t_end` or the configured event budget, whichever
    /// comes first (SPEC_FULL.md §4.10 steps 2-3).
    pub fn run(&mut self) -> Result<SimulationReport> {
        while self.step()?.is_some() {
            if let Some(max) = self.max_events {
                let total = self.report.discrete_events + self.report.qss_events + self.report.zero_crossing_events + self.report.handler_events;
                if total >= max {
                    break;
                }
            }
        }
        self.report.final_time = self.queue.top_time().map(|s| s.t).unwrap_or(self.t_end).min(self.t_end);
        Ok(self.report.clone())
    }

    /// Process exactly one same-pass event batch, returning the
    /// superdense time it was processed at, or `None` if the queue is
    /// empty or has advanced past `t_end`. Exposed so a caller (the CLI's
    /// output sampler) can inspect variable trajectories between batches
    /// without duplicating the main loop's dispatch logic.
    pub fn step(&mut self) -> Result<Option<f64>> {
        let Some(top) = self.queue.top_time() else { return Ok(None) };
        if top.t >= self.t_end {
            return Ok(None);
        }
        self.check_infinite_loop_guard(top.t)?;

        let batch = self.queue.pop_same_pass();
        if batch.is_empty() {
            return Ok(None);
        }
        self.process_batch(top.t, batch)?;
        Ok(Some(top.t))
    }

    fn check_infinite_loop_guard(&mut self, t: f64) -> Result<()> {
        if t == self.current_t_marker {
            self.events_at_current_t += 1;
        } else {
            self.current_t_marker = t;
            self.events_at_current_t = 1;
        }
        let limit = self.config.max_pass_count_multiplier as u64 * self.variables.len().max(1) as u64;
        if self.events_at_current_t > limit {
            let offenders: Vec<String> = self.variables.iter().map(|v| v.name.clone()).collect();
            return Err(QssError::InfiniteEventLoop { t, variables: offenders });
        }
        Ok(())
    }

    fn process_batch(&mut self, t: f64, batch: Vec<QueueItem>) -> Result<()> {
        let mut by_kind: Vec<(EventKind, Vec<VariableId>)> = Vec::new();
        for kind in [EventKind::Discrete, EventKind::QssInput, EventKind::Qss, EventKind::ZeroCrossing, EventKind::Handler] {
            let ids: Vec<VariableId> = batch.iter().filter(|i| i.kind == kind).map(|i| i.var).collect();
            if !ids.is_empty() {
                by_kind.push((kind, ids));
            }
        }

        for (kind, ids) in by_kind {
            match kind {
                EventKind::Discrete | EventKind::QssInput | EventKind::Qss => {
                    self.advance_group(t, &ids, kind)?;
                }
                EventKind::ZeroCrossing => {
                    for &id in &ids {
                        let observers = dispatch_handler(&mut self.variables, &mut self.oracle, &self.config, &mut self.queue, id.0, t)?;
                        self.report.zero_crossing_events += 1;
                        for o in observers {
                            advance_observer(&mut self.variables, &mut self.oracle, &self.config, &mut self.queue, o.0, t)?;
                        }
                    }
                }
                EventKind::Handler => {
                    self.report.handler_events += ids.len() as u64;
                }
            }
        }
        Ok(())
    }

    fn advance_group(&mut self, t: f64, ids: &[VariableId], kind: EventKind) -> Result<()> {
        let expanded = expand_with_clusters(&self.variables, ids);
        let observers = if expanded.len() > 1 {
            run_simultaneous_trigger_group(
                &mut self.variables,
                &mut self.oracle,
                &self.config,
                &mut self.queue,
                &mut self.scratch,
                &expanded,
                t,
            )?
        } else if let [only] = expanded[..] {
            self.advance_single(t, only)?
        } else {
            Vec::new()
        };

        match kind {
            EventKind::Discrete => self.report.discrete_events += expanded.len() as u64,
            EventKind::QssInput | EventKind::Qss => self.report.qss_events += expanded.len() as u64,
            _ => {}
        }

        // Zero-crossing variables never join a state cluster (only
        // `Continuous` variables do), so any zero-crossing trigger in
        // `expanded` was already handled by `advance_single` above.
        for o in observers {
            check_unpredicted_crossing(&mut self.variables, &mut self.queue, o.0, t);
        }
        Ok(())
    }

    fn advance_single(&mut self, t: f64, idx: VariableId) -> Result<Vec<VariableId>> {
        let i = idx.0;
        if self.variables[i].kind.is_zero_crossing() {
            predict_crossing(&mut self.variables, &mut self.oracle, &mut self.queue, i, t)?;
            return Ok(Vec::new());
        }
        let is_liqss_self = matches!(
            self.variables[i].kind,
            VariableKind::Continuous { algorithm: StateAlgorithm::Liqss, .. }
        ) && self.variables[i].self_observer;

        let observers = if is_liqss_self {
            requantize_liqss(&mut self.variables, &mut self.oracle, &self.config, &mut self.queue, i, ObserveeRep::Quantized)?
        } else {
            requantize_qss(&mut self.variables, &mut self.oracle, &self.config, &mut self.queue, i)?
        };

        let _ = t;
        for &o in &observers {
            advance_observer(&mut self.variables, &mut self.oracle, &self.config, &mut self.queue, o.0, self.variables[i].t_x)?;
        }
        Ok(observers)
    }
}

fn event_kind_for(kind: VariableKind) -> EventKind {
    match kind {
        VariableKind::Discrete => EventKind::Discrete,
        VariableKind::Input { discrete: true } => EventKind::Discrete,
        VariableKind::Input { discrete: false } => EventKind::QssInput,
        VariableKind::ZeroCrossing => EventKind::Qss,
        VariableKind::RealPassthrough | VariableKind::Connection => EventKind::QssInput,
        VariableKind::Continuous { .. } => EventKind::Qss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::DerivativeSource;
    use std::cell::RefCell;
    use std::collections::HashMap;

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
            *self.reals.borrow().get(&r.0).unwrap_or(&1.0)
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
        fn directional_derivatives(&self, _s: &[VariableId], _o: &[VariableId], _sv: &[f64], _ov: &mut [f64]) -> Result<()> {
            Ok(())
        }
        fn do_event_iteration(&mut self) {}
        fn completed_integrator_step(&mut self) {}
        fn get_event_indicators(&self, _out: &mut [f64]) {}
    }

    #[test]
    fn single_decay_variable_runs_to_completion() {
        let v = Variable::new(
            VariableId(0),
            "x",
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            1,
            1e-3,
            1e-6,
            0.0,
        );
        let mut oracle = DecayOracle { t: 0.0, reals: RefCell::new(HashMap::new()) };
        oracle.set_real(VariableId(0), 1.0);
        let config = SimConfig::default();
        let mut sim = Simulator::new(vec![v], oracle, config, 0.0, 5.0);
        sim.initialize().unwrap();
        let report = sim.run().unwrap();
        assert!(report.final_time <= 5.0);
        assert!(report.qss_events >= 1);
    }
}
