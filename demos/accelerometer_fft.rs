//! Spectrum of a generated accelerometer signal.
//!
//! This example shows how to:
//! 1. Register the built-in generated sources with a hub
//! 2. Load an experiment from JSON
//! 3. Run acquisition and analysis for a few seconds
//! 4. Read analysis results from buffers while the session runs
//!
//! Run with: cargo run --example accelerometer_fft

use std::time::Duration;

use sensorflow::{
    builtin_sources, EngineConfig, EventClock, ExperimentDescriptor, ExperimentSession, SensorHub,
};

const EXPERIMENT: &str = include_str!("accelerometer_fft.json");

fn main() {
    println!("Sensorflow - Accelerometer FFT Demo");
    println!("===================================");
    println!();

    let experiment = match ExperimentDescriptor::from_json(EXPERIMENT) {
        Ok(experiment) => experiment,
        Err(e) => {
            eprintln!("Invalid experiment: {e}");
            return;
        }
    };

    let clock = EventClock::new();
    let mut hub = SensorHub::new(clock);
    for source in builtin_sources(clock) {
        if let Err(e) = hub.register(Box::new(source)) {
            eprintln!("Could not register source: {e}");
            return;
        }
    }

    let mut session = match ExperimentSession::new(&experiment, hub, EngineConfig::default()) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Could not set up experiment: {e}");
            return;
        }
    };

    if let Err(e) = session.start() {
        eprintln!("Could not start: {e}");
        return;
    }
    println!("Collecting for 5 seconds...");
    println!();

    for second in 1..=5 {
        std::thread::sleep(Duration::from_secs(1));
        let last = |name: &str| session.buffer(name).and_then(|b| b.last());
        println!(
            "[{second}s] samples: {:>5} | peak frequency: {:>6.2} Hz | peak power: {:>10.2}",
            session.buffer("accT").map_or(0, |b| b.len()),
            last("peakFrequency").unwrap_or(f64::NAN),
            last("peakPower").unwrap_or(f64::NAN),
        );
    }

    session.stop();
    println!();
    println!("{}", session.stats().summary());
}
