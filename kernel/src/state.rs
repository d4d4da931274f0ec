//! Persisted simulation state: a versioned, tagged byte stream capturing
//! every variable's trajectory coefficients, the event queue's contents,
//! and an opaque oracle-owned blob (spec.md §6.4).
//!
//! Round-trip requirement: `from_bytes(capture(...).to_bytes())` followed
//! by one simulator step must match stepping from the original state
//! within 1 ULP per coefficient.

use serde::{Deserialize, Serialize};

use qss_core::{EventKind, EventQueue, SuperdenseTime, Variable, VariableId};

use crate::error::{EngineError, Result};

const STATE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VariableState {
    id: usize,
    t_q: f64,
    t_x: f64,
    t_e: f64,
    t_z: f64,
    x: [f64; 4],
    q: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEntryState {
    var_id: usize,
    t: f64,
    i: u64,
    o: u32,
}

fn kind_from_offset(o: u32) -> EventKind {
    match o {
        0 => EventKind::Discrete,
        1 => EventKind::QssInput,
        2 => EventKind::Qss,
        3 => EventKind::ZeroCrossing,
        _ => EventKind::Handler,
    }
}

/// A captured, serializable snapshot of one simulation's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    version: u8,
    pub sim_time: f64,
    variables: Vec<VariableState>,
    queue: Vec<QueueEntryState>,
    /// Opaque model-owned bytes (FMU internal state, discrete-input
    /// history, etc). The core and this crate never interpret this.
    pub oracle_blob: Vec<u8>,
}

impl PersistedState {
    /// Snapshot `variables` and the live contents of `queue` at `sim_time`.
    pub fn capture(sim_time: f64, variables: &[Variable], queue_contents: &[(VariableId, SuperdenseTime, EventKind)], oracle_blob: Vec<u8>) -> Self {
        let variables = variables
            .iter()
            .map(|v| VariableState { id: v.id.0, t_q: v.t_q, t_x: v.t_x, t_e: v.t_e, t_z: v.t_z, x: v.x, q: v.q })
            .collect();
        let queue = queue_contents
            .iter()
            .map(|(var, sdt, kind)| QueueEntryState { var_id: var.0, t: sdt.t, i: sdt.i, o: kind.offset() })
            .collect();
        Self { version: STATE_VERSION, sim_time, variables, queue, oracle_blob }
    }

    /// Serialize with a leading version tag byte.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.version];
        buf.extend(serde_json::to_vec(self)?);
        Ok(buf)
    }

    /// Parse a byte stream produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some((&version, body)) = bytes.split_first() else {
            return Err(EngineError::state("empty persisted-state byte stream"));
        };
        if version != STATE_VERSION {
            return Err(EngineError::state(format!("unsupported persisted-state version {version}, expected {STATE_VERSION}")));
        }
        let state: PersistedState = serde_json::from_slice(body)?;
        Ok(state)
    }

    /// Overwrite `variables`' trajectory coefficients and times from this
    /// snapshot. Variable count and ids must match the model this
    /// snapshot was taken from.
    pub fn restore_into(&self, variables: &mut [Variable]) -> Result<()> {
        for vs in &self.variables {
            let v = variables
                .get_mut(vs.id)
                .ok_or_else(|| EngineError::state(format!("snapshot references unknown variable id {}", vs.id)))?;
            v.t_q = vs.t_q;
            v.t_x = vs.t_x;
            v.t_e = vs.t_e;
            v.t_z = vs.t_z;
            v.x = vs.x;
            v.q = vs.q;
        }
        Ok(())
    }

    /// Rebuild a fresh `EventQueue` from this snapshot's recorded
    /// entries. Returns handles keyed by variable id, for the caller to
    /// reattach to `Variable::event_handle`.
    pub fn rebuild_queue(&self, variables: &[Variable]) -> Result<(EventQueue, Vec<(VariableId, qss_core::EventHandle)>)> {
        let mut queue = EventQueue::new();
        let mut handles = Vec::with_capacity(self.queue.len());
        for e in &self.queue {
            let var = variables
                .get(e.var_id)
                .ok_or_else(|| EngineError::state(format!("queue snapshot references unknown variable id {}", e.var_id)))?;
            let sdt = SuperdenseTime::new(e.t, e.i, e.o);
            let kind = kind_from_offset(e.o);
            let handle = queue.add(sdt, var.id, &var.name, kind);
            handles.push((var.id, handle));
        }
        Ok((queue, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qss_core::{DerivativeSource, StateAlgorithm, VariableKind};

    fn sample_var() -> Variable {
        let mut v = Variable::new(
            VariableId(0),
            "x",
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            1,
            1e-4,
            1e-6,
            0.0,
        );
        v.x[0] = 3.5;
        v.t_x = 1.25;
        v
    }

    #[test]
    fn round_trip_preserves_coefficients_exactly() {
        let v = sample_var();
        let queue_contents = vec![(v.id, SuperdenseTime::with_kind(2.0, 0, EventKind::Qss), EventKind::Qss)];
        let snapshot = PersistedState::capture(1.25, &[v.clone()], &queue_contents, vec![1, 2, 3]);
        let bytes = snapshot.to_bytes().unwrap();
        let restored = PersistedState::from_bytes(&bytes).unwrap();
        assert_eq!(restored.oracle_blob, vec![1, 2, 3]);

        let mut vars = vec![Variable::new(VariableId(0), "x", v.kind, v.order, v.r_tol, v.a_tol, v.z_tol)];
        restored.restore_into(&mut vars).unwrap();
        assert_eq!(vars[0].x[0], 3.5);
        assert_eq!(vars[0].t_x, 1.25);

        let (_queue, handles) = restored.rebuild_queue(&vars).unwrap();
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn rejects_mismatched_version() {
        let mut bytes = vec![99];
        bytes.extend(b"{}");
        assert!(PersistedState::from_bytes(&bytes).is_err());
    }
}
