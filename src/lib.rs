//! Sensorflow - sensor acquisition and analysis dataflow engine.
//!
//! This library turns irregular, independently clocked sensor callbacks into
//! evenly timed buffer contents on a shared experiment clock, and runs a
//! declarative graph of numeric modules over those buffers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ExperimentSession                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │ Sources  │──▶│ SensorHub│──▶│ Acquisition│──▶│  Buffers   │   │
//! │  │(threads) │   │ (fan-out)│   │  worker    │   │ (RwLock +  │   │
//! │  └──────────┘   └──────────┘   │ reconciler │   │  spill)    │   │
//! │                                │ + TimeBase │   └─────┬──────┘   │
//! │                                └────────────┘         │          │
//! │                                                 ┌─────▼──────┐   │
//! │                                                 │  Analysis  │   │
//! │                                                 │   graph    │   │
//! │                                                 └────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensorflow::{
//!     builtin_sources, EngineConfig, EventClock, ExperimentDescriptor, ExperimentSession,
//!     SensorHub,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let experiment = ExperimentDescriptor::from_json(&std::fs::read_to_string("experiment.json")?)?;
//!
//! let clock = EventClock::new();
//! let mut hub = SensorHub::new(clock);
//! for source in builtin_sources(clock) {
//!     hub.register(Box::new(source))?;
//! }
//!
//! let mut session = ExperimentSession::new(&experiment, hub, EngineConfig::load()?)?;
//! session.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! session.stop();
//!
//! if let Some(buffer) = session.buffer("accX") {
//!     println!("accX = {:?}", buffer.last());
//! }
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod analysis;
pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod session;
pub mod source;
pub mod stats;
pub mod timebase;

// Re-export key types at crate root for convenience
pub use analysis::{AnalysisGraph, AnalysisRunner, Module, Operator};
pub use buffer::{BufferCapacity, BufferError, BufferHandle, BufferTable, SharedBuffer};
pub use config::{ConfigError, EngineConfig};
pub use descriptor::{
    BufferDescriptor, ChannelDescriptor, ConfigurationError, ExperimentDescriptor, GraphDescriptor,
    InputDescriptor, ModuleDescriptor, ModuleInputDescriptor, ModuleOutputDescriptor,
};
pub use session::{ExperimentSession, SessionError};
pub use source::{
    builtin_sources, ChannelKind, Emission, ManualSource, ManualSourceHandle, RateReconciler,
    RateStrategy, SampleSink, SampleSource, SensorHub, SensorInput, SourceError, SourceRequest,
    SourceUnavailable, SyntheticSource,
};
pub use stats::{AcquisitionStats, SharedAcquisitionStats, StatsSnapshot};
pub use timebase::{EventClock, SharedTimeBase, TimeBase};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
