//! Source capability types.
//!
//! A source is anything that can be started at a requested rate, stopped, and
//! that emits timestamped channel tuples while running. How samples are
//! physically captured is up to the implementation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// How a source's native cadence is turned into buffer writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStrategy {
    /// Pass samples through, switching to `Generate` if the source runs fast
    #[default]
    Auto,
    /// Pass every sample through
    Request,
    /// Emit one averaged value per interval, catching up on missed intervals
    Generate,
    /// Average down to at most one value per interval
    Limit,
}

/// How a channel is combined when samples are averaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Averaged by sum / count
    #[default]
    Value,
    /// Worst (smallest) accuracy wins
    Accuracy,
}

/// Parameters a source is started with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRequest {
    /// Requested output period in seconds (0 = native)
    pub rate: f64,
    pub strategy: RateStrategy,
}

impl Default for SourceRequest {
    fn default() -> Self {
        Self {
            rate: 0.0,
            strategy: RateStrategy::Auto,
        }
    }
}

/// Per-sample transport error. The sample is dropped, the stream continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),
}

/// The source cannot be started (missing hardware, denied permission).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Source '{source_id}' is unavailable: {reason}")]
pub struct SourceUnavailable {
    pub source_id: String,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}

/// One callback from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Channel values in the source's channel order
    pub values: Vec<Option<f64>>,
    /// Timestamp on the source's event clock, seconds
    pub event_time: f64,
    pub error: Option<SourceError>,
}

impl Emission {
    pub fn new(values: Vec<Option<f64>>, event_time: f64) -> Self {
        Self {
            values,
            event_time,
            error: None,
        }
    }

    /// A single-channel sample.
    pub fn scalar(value: f64, event_time: f64) -> Self {
        Self::new(vec![Some(value)], event_time)
    }

    /// A motion-sensor sample: `[x, y, z, |v|, accuracy]`.
    pub fn vector(x: f64, y: f64, z: f64, accuracy: Option<f64>, event_time: f64) -> Self {
        let magnitude = (x * x + y * y + z * z).sqrt();
        Self::new(
            vec![Some(x), Some(y), Some(z), Some(magnitude), accuracy],
            event_time,
        )
    }

    /// A failed sample.
    pub fn failed(error: SourceError, event_time: f64) -> Self {
        Self {
            values: Vec::new(),
            event_time,
            error: Some(error),
        }
    }
}

/// Callback a running source delivers emissions to.
pub type SampleSink = Arc<dyn Fn(Emission) + Send + Sync>;

/// Capability implemented by every physical or synthetic source.
pub trait SampleSource: Send {
    /// Identifier the source is registered under.
    fn id(&self) -> &str;

    /// Start delivering emissions to `sink`.
    fn start(&mut self, request: &SourceRequest, sink: SampleSink)
        -> Result<(), SourceUnavailable>;

    /// Stop delivering. Calling this on a stopped source is a no-op.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
