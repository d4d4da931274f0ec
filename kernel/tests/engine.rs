//! End-to-end tests for `qss-engine`'s model loading, output sinks, and
//! persisted-state round trip, layered on top of the reference demo
//! models in [`qss_engine::testutil`] (spec.md §6.2-§6.4).

use qss_core::{EventKind, Oracle, SimConfig, Simulator, SuperdenseTime};
use qss_engine::output::{BufferedSampleStream, CsvOutputSink, Sample, SampleKind};
use qss_engine::state::PersistedState;
use qss_engine::testutil::{self, ACHILLES_X1, ACHILLES_X2};
use qss_engine::ModelMetadata;

#[test]
fn bouncing_ball_model_toml_round_trips_and_builds() {
    let meta = testutil::bouncing_ball_metadata();
    let text = toml::to_string_pretty(&meta).unwrap();
    let reparsed = ModelMetadata::from_toml(&text).unwrap();
    let variables = reparsed.build_variables().unwrap();
    assert_eq!(variables.len(), 4);
    assert_eq!(variables[testutil::BBALL_H.0].name, "h");
    assert_eq!(variables[testutil::BBALL_Z.0].handler_variables.len(), 3);
}

#[test]
fn csv_sink_captures_a_full_bouncing_ball_run() {
    let (variables, oracle) = testutil::bouncing_ball_model();
    let mut sim = Simulator::new(variables, oracle, SimConfig::default(), 0.0, 2.0);
    sim.initialize().unwrap();

    let mut buf = Vec::new();
    {
        let sink = CsvOutputSink::new(&mut buf);
        let mut stream = BufferedSampleStream::new(sink);
        while let Some(t) = sim.step().unwrap() {
            let h = sim.variables[testutil::BBALL_H.0].q_at(t);
            stream.push("h", SampleKind::Q, Sample { t, value: h }).unwrap();
        }
        stream.finish().unwrap();
    }

    let text = String::from_utf8(buf).unwrap();
    let row_count = text.lines().filter(|l| !l.starts_with("var,kind")).count();
    assert!(row_count > 0, "the run should have produced at least one sample");
    assert!(text.lines().next().unwrap().starts_with("var,kind,t,value"));
}

#[test]
fn persisted_state_round_trip_preserves_mid_run_trajectory() {
    let (variables, oracle) = testutil::achilles_model(qss_core::StateAlgorithm::Liqss, 2);
    let mut sim = Simulator::new(variables, oracle, SimConfig::default(), 0.0, 5.0);
    sim.initialize().unwrap();

    // Advance partway through the run before snapshotting.
    for _ in 0..5 {
        if sim.step().unwrap().is_none() {
            break;
        }
    }

    let queue_contents: Vec<_> = sim
        .variables
        .iter()
        .filter_map(|v| v.event_handle.map(|_| (v.id, SuperdenseTime::with_kind(v.t_e, 0, EventKind::Qss), EventKind::Qss)))
        .collect();
    let snapshot = PersistedState::capture(sim.oracle.time(), &sim.variables, &queue_contents, Vec::new());
    let bytes = snapshot.to_bytes().unwrap();
    let restored = PersistedState::from_bytes(&bytes).unwrap();

    let (mut fresh_variables, _) = testutil::achilles_model(qss_core::StateAlgorithm::Liqss, 2);
    restored.restore_into(&mut fresh_variables).unwrap();

    for (original, restored_var) in sim.variables.iter().zip(fresh_variables.iter()) {
        assert_eq!(original.x, restored_var.x, "variable '{}' coefficients must round-trip exactly", original.name);
        assert_eq!(original.t_x, restored_var.t_x);
    }

    let gap_before = (sim.oracle.get_real(ACHILLES_X2) - sim.oracle.get_real(ACHILLES_X1)).abs();
    assert!(gap_before.is_finite());
}

#[test]
fn simulation_config_rejects_an_inverted_run_window_from_toml() {
    let text = r#"
[run]
t_start = 5.0
t_end = 1.0
"#;
    let config: qss_engine::SimulationConfig = toml::from_str(text).unwrap();
    assert!(config.validate().is_err());
}
