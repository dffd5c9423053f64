//! End-to-end acquisition scenarios driven through manual sources.

use sensorflow::{
    BufferCapacity, BufferDescriptor, ChannelDescriptor, EngineConfig, Emission, EventClock,
    ExperimentDescriptor, ExperimentSession, GraphDescriptor, InputDescriptor, ManualSource,
    ManualSourceHandle, RateStrategy, SensorHub, SessionError,
};
use std::path::Path;

fn config(dir: &Path) -> EngineConfig {
    EngineConfig {
        spill_root: dir.to_path_buf(),
        generate_ticks: false,
        ..EngineConfig::default()
    }
}

fn single_input(strategy: RateStrategy, rate: f64) -> ExperimentDescriptor {
    ExperimentDescriptor {
        title: "scenario".into(),
        buffers: vec![
            BufferDescriptor::new("t", BufferCapacity::Unbounded),
            BufferDescriptor::new("x", BufferCapacity::Unbounded),
        ],
        inputs: vec![InputDescriptor {
            source: "acc".into(),
            rate,
            strategy,
            stride: 1,
            average: true,
            time: Some("t".into()),
            channels: vec![ChannelDescriptor {
                kind: Default::default(),
                buffer: Some("x".into()),
            }],
        }],
        analysis: GraphDescriptor::default(),
    }
}

fn manual_session(
    dir: &Path,
    descriptor: &ExperimentDescriptor,
) -> (ExperimentSession, ManualSourceHandle) {
    let mut hub = SensorHub::new(EventClock::new());
    let (source, handle) = ManualSource::new("acc");
    hub.register(Box::new(source)).unwrap();
    let session = ExperimentSession::new(descriptor, hub, config(dir)).unwrap();
    (session, handle)
}

#[test]
fn test_bursty_source_is_promoted_and_averaged() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, handle) = manual_session(dir.path(), &single_input(RateStrategy::Auto, 0.01));

    // 300 Hz delivered as bursts of three every 10 ms.
    session.start_acquisition_at(0.0).unwrap();
    let offsets = [0.0, 0.002, 0.005];
    let mut value = 0.0;
    for burst in 0..30 {
        for offset in offsets {
            assert!(handle.emit(Emission::scalar(value, burst as f64 * 0.01 + offset)));
            value += 1.0;
        }
    }
    session.flush();
    session.stop_at(1.0);

    // Two raw samples, then one mean of three per 10 ms interval.
    let x = session.buffer("x").unwrap().to_array();
    let mut expected = vec![0.0, 1.0];
    expected.extend((1..30).map(|k| 3.0 * k as f64));
    assert_eq!(x, expected);

    let t = session.buffer("t").unwrap().to_array();
    assert_eq!(t.len(), x.len());
    for pair in t[2..].windows(2) {
        assert!((pair[1] - pair[0] - 0.01).abs() < 1e-9);
    }
    assert_eq!(session.stats().stats().received, 90);
}

#[test]
fn test_limit_caps_fast_source() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, handle) = manual_session(dir.path(), &single_input(RateStrategy::Limit, 0.1));

    session.start_acquisition_at(0.0).unwrap();
    for i in 0..1000 {
        handle.emit(Emission::scalar(i as f64, i as f64 / 1000.0));
    }
    session.flush();
    session.stop_at(1.0);

    // The last window is never closed, so a 1 s run yields nine means.
    let x = session.buffer("x").unwrap().to_array();
    assert_eq!(x.len(), 9, "got {x:?}");
    assert!((x[0] - 49.5).abs() <= 0.5);
    // Each output is the mean of one window of roughly a hundred samples.
    for pair in x.windows(2) {
        let step = pair[1] - pair[0];
        assert!((99.0..=101.0).contains(&step), "step {step}");
    }
    let t = session.buffer("t").unwrap().to_array();
    for pair in t.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[test]
fn test_stale_samples_after_resume_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, handle) =
        manual_session(dir.path(), &single_input(RateStrategy::Request, 0.0));

    session.start_acquisition_at(0.0).unwrap();
    handle.emit(Emission::scalar(1.0, 1.0));
    session.flush();
    session.stop_at(2.0);

    session.start_acquisition_at(10.0).unwrap();
    // Stamped before the stop, delivered after the restart.
    handle.emit(Emission::scalar(2.0, 1.5));
    handle.emit(Emission::scalar(3.0, 10.5));
    session.flush();
    session.stop_at(11.0);

    assert_eq!(session.buffer("x").unwrap().to_array(), vec![1.0, 3.0]);
    assert_eq!(session.buffer("t").unwrap().to_array(), vec![1.0, 2.5]);
    assert_eq!(session.stats().stats().rejected, 1);
}

#[test]
fn test_unavailable_source_blocks_whole_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let mut descriptor = single_input(RateStrategy::Request, 0.0);
    let mut second = descriptor.inputs[0].clone();
    second.source = "gyro".into();
    second.time = None;
    descriptor.inputs.push(second);

    let mut hub = SensorHub::new(EventClock::new());
    let (source, handle) = ManualSource::new("acc");
    hub.register(Box::new(source)).unwrap();
    hub.register(Box::new(ManualSource::unavailable("gyro")))
        .unwrap();

    let mut session = ExperimentSession::new(&descriptor, hub, config(dir.path())).unwrap();
    let err = session.start_at(0.0).unwrap_err();
    assert!(matches!(err, SessionError::SourceUnavailable(_)));
    assert!(err.to_string().contains("gyro"));

    // The available source was released again.
    assert!(!session.is_running());
    assert!(!handle.is_running());
    assert_eq!(session.hub().subscriber_count("acc"), 0);
}
