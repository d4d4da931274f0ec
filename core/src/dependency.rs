//! The observer/observee dependency graph: raw edges, the computational
//! closure that collapses passive pass-through variables, and state
//! dependency cluster detection via Tarjan's (non-recursive) SCC
//! algorithm (spec.md §3.4, §3.5).

use std::collections::HashSet;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{QssError, Result};
use crate::variable::{ClusterId, Variable, VariableId, VariableKind};

fn is_passive(kind: VariableKind) -> bool {
    matches!(kind, VariableKind::RealPassthrough | VariableKind::Connection)
}

/// Collapse each variable's raw observees through any chain of passive
/// pass-through variables (real passthrough, connection) into the
/// **computational observees** set, and derive the reverse
/// **computational observers** closure from it (spec.md §3.4).
pub fn compute_computational_closures(variables: &mut [Variable]) {
    let n = variables.len();
    for i in 0..n {
        let mut seen: HashSet<VariableId> = HashSet::new();
        let mut result = Vec::new();
        let mut stack: Vec<VariableId> = variables[i].observees.clone();
        while let Some(dep) = stack.pop() {
            if !seen.insert(dep) {
                continue;
            }
            let dep_var = &variables[dep.0];
            if is_passive(dep_var.kind) {
                stack.extend(dep_var.observees.iter().copied());
            } else {
                result.push(dep);
            }
        }
        result.sort_unstable();
        result.dedup();
        variables[i].computational_observees = result;
    }

    for v in variables.iter_mut() {
        v.computational_observers.clear();
    }
    for i in 0..n {
        let observees = variables[i].computational_observees.clone();
        for dep in observees {
            variables[dep.0].computational_observers.push(VariableId(i));
        }
    }
    for v in variables.iter_mut() {
        v.computational_observers.sort_unstable();
        v.computational_observers.dedup();
    }
}

/// Verify invariant 3: for every observee `v` of `u`, `u` appears in
/// `v.observers`, except when `v` is a zero-crossing (whose dependents
/// are tracked through the handler mapping instead).
pub fn verify_observer_consistency(variables: &[Variable]) -> Result<()> {
    for u in variables {
        for &v_id in &u.observees {
            let v = &variables[v_id.0];
            if v.kind.is_zero_crossing() {
                continue;
            }
            if !v.observers.contains(&u.id) {
                return Err(QssError::invariant(format!(
                    "'{}' observes '{}' but is not in its observer list",
                    u.name, v.name
                )));
            }
        }
    }
    Ok(())
}

/// Detect strongly-connected groups of *state* variables (QSS/LIQSS
/// continuous variables) in the computational-observee graph and assign
/// a shared `ClusterId` to every member of a non-trivial group
/// (spec.md §3.5). Uses Tarjan's algorithm, which petgraph implements
/// iteratively (no recursion, so arbitrarily deep cycles are safe).
pub fn detect_state_clusters(variables: &mut [Variable]) {
    let n = variables.len();
    let mut graph = DiGraph::<VariableId, ()>::with_capacity(n, n);
    let mut node_of = vec![NodeIndex::end(); n];
    for v in variables.iter() {
        node_of[v.id.0] = graph.add_node(v.id);
    }
    for v in variables.iter() {
        if !v.kind.is_state() {
            continue;
        }
        for &dep in &v.computational_observees {
            if variables[dep.0].kind.is_state() {
                graph.add_edge(node_of[v.id.0], node_of[dep.0], ());
            }
        }
    }

    let sccs = tarjan_scc(&graph);
    let mut next_cluster = 0usize;
    for scc in sccs {
        if scc.len() < 2 {
            // A lone state variable is only a cluster if it has a
            // self-loop (appears in its own computational observees).
            let idx = scc[0];
            let vid = graph[idx];
            if !variables[vid.0].computational_observees.contains(&vid) {
                continue;
            }
        }
        let cluster = ClusterId(next_cluster);
        next_cluster += 1;
        for idx in scc {
            let vid = graph[idx];
            variables[vid.0].cluster = Some(cluster);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{DerivativeSource, StateAlgorithm, Variable, VariableId, VariableKind};

    fn state_var(id: usize, name: &str) -> Variable {
        Variable::new(
            VariableId(id),
            name,
            VariableKind::Continuous { algorithm: StateAlgorithm::Qss, derivative_source: DerivativeSource::Directional },
            1,
            1e-4,
            1e-6,
            0.0,
        )
    }

    #[test]
    fn computational_closure_collapses_passthrough() {
        let mut a = state_var(0, "a");
        let mut pass = Variable::new(VariableId(1), "p", VariableKind::RealPassthrough, 1, 1e-4, 1e-6, 0.0);
        let b = state_var(2, "b");
        pass.observees = vec![VariableId(2)];
        a.observees = vec![VariableId(1)];
        let mut vars = vec![a, pass, b];
        compute_computational_closures(&mut vars);
        assert_eq!(vars[0].computational_observees, vec![VariableId(2)]);
        assert!(vars[2].computational_observers.contains(&VariableId(0)));
    }

    #[test]
    fn observer_consistency_detects_missing_backedge() {
        let mut a = state_var(0, "a");
        let b = state_var(1, "b");
        a.observees = vec![VariableId(1)];
        // b.observers intentionally left empty -> invariant violation
        let vars = vec![a, b];
        assert!(verify_observer_consistency(&vars).is_err());
    }

    #[test]
    fn zero_crossing_observee_is_exempt_from_backedge_check() {
        let mut a = state_var(0, "a");
        let zc = Variable::new(VariableId(1), "z", VariableKind::ZeroCrossing, 1, 1e-4, 1e-6, 1e-9);
        a.observees = vec![VariableId(1)];
        let vars = vec![a, zc];
        assert!(verify_observer_consistency(&vars).is_ok());
    }

    #[test]
    fn detects_two_cycle_as_cluster() {
        let mut a = state_var(0, "x1");
        let mut b = state_var(1, "x2");
        a.observees = vec![VariableId(1)];
        b.observees = vec![VariableId(0)];
        let mut vars = vec![a.clone(), b.clone()];
        compute_computational_closures(&mut vars);
        detect_state_clusters(&mut vars);
        assert_eq!(vars[0].cluster, vars[1].cluster);
        assert!(vars[0].cluster.is_some());
        let _ = (a, b);
    }

    #[test]
    fn acyclic_pair_gets_no_cluster() {
        let mut a = state_var(0, "x1");
        let b = state_var(1, "x2");
        a.observees = vec![VariableId(1)];
        let mut vars = vec![a, b];
        compute_computational_closures(&mut vars);
        detect_state_clusters(&mut vars);
        assert!(vars[0].cluster.is_none());
        assert!(vars[1].cluster.is_none());
    }
}
