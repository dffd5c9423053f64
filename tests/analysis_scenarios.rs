//! Analysis graphs loaded from experiment JSON.

use sensorflow::{
    builtin_sources, AnalysisGraph, BufferTable, EngineConfig, EventClock, ExperimentDescriptor,
    ExperimentSession, SensorHub,
};
use std::f64::consts::PI;

const DEMO: &str = include_str!("../demos/accelerometer_fft.json");

fn builtin_hub() -> SensorHub {
    let clock = EventClock::new();
    let mut hub = SensorHub::new(clock);
    for source in builtin_sources(clock) {
        hub.register(Box::new(source)).unwrap();
    }
    hub
}

#[test]
fn test_add_literal_leaves_input_untouched() {
    let experiment = ExperimentDescriptor::from_json(
        r#"{
            "title": "add",
            "buffers": [
                {"name": "a", "capacity": {"bounded": 1}, "seed": [2.0]},
                {"name": "b", "capacity": "unbounded"}
            ],
            "analysis": {
                "modules": [
                    {"operator": "add",
                     "inputs": [{"buffer": {"name": "a"}}, {"value": 3.0}],
                     "outputs": [{"buffer": "b", "clear": false}]}
                ]
            }
        }"#,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let buffers = BufferTable::build(&experiment.buffers, dir.path()).unwrap();
    let graph =
        AnalysisGraph::from_descriptor(&experiment.analysis, &buffers, &EngineConfig::default())
            .unwrap();

    assert!(graph.run_iteration(&buffers));
    assert_eq!(buffers.by_name("b").unwrap().last(), Some(5.0));
    assert_eq!(buffers.by_name("a").unwrap().to_array(), vec![2.0]);
}

#[test]
fn test_unknown_operator_rejected() {
    let experiment = ExperimentDescriptor::from_json(
        r#"{
            "title": "bad",
            "buffers": [{"name": "a"}],
            "analysis": {"modules": [{"operator": "wavelet", "inputs": [{"buffer": {"name": "a"}}]}]}
        }"#,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        spill_root: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let err = ExperimentSession::new(&experiment, builtin_hub(), config)
        .err()
        .unwrap();
    assert!(err.to_string().contains("wavelet"));
}

#[test]
fn test_demo_experiment_validates() {
    let experiment = ExperimentDescriptor::from_json(DEMO).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        spill_root: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };

    let session = ExperimentSession::new(&experiment, builtin_hub(), config).unwrap();
    assert_eq!(session.title(), "Accelerometer spectrum");
    assert!(!session.is_running());
}

#[test]
fn test_demo_spectrum_finds_peak() {
    let experiment = ExperimentDescriptor::from_json(DEMO).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let buffers = BufferTable::build(&experiment.buffers, dir.path()).unwrap();
    let graph =
        AnalysisGraph::from_descriptor(&experiment.analysis, &buffers, &EngineConfig::default())
            .unwrap();

    // Nothing runs until the 256-sample window is full.
    assert!(!graph.run_iteration(&buffers));

    // 12.5 Hz sampled every 10 ms lands exactly on bin 32.
    let signal: Vec<f64> = (0..256)
        .map(|i| (2.0 * PI * 12.5 * i as f64 * 0.01).sin())
        .collect();
    buffers.by_name("accX").unwrap().append_all(&signal).unwrap();
    assert!(graph.run_iteration(&buffers));

    let peak = buffers.by_name("peakFrequency").unwrap().last().unwrap();
    assert!((peak - 12.5).abs() < 1e-6, "peak at {peak}");
    assert_eq!(buffers.by_name("power").unwrap().len(), 127);
    assert_eq!(buffers.by_name("frequency").unwrap().len(), 127);
}
