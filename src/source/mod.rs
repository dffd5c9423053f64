//! Sample sources and the inputs that read them.
//!
//! Sources push [`Emission`]s through a callback. The [`SensorHub`] fans each
//! emission out to every [`SensorInput`] subscribed to that source; each input
//! reconciles the source's cadence with its requested rate and appends the
//! result to its buffers.

pub mod hub;
pub mod input;
pub mod reconciler;
pub mod synthetic;
pub mod types;

pub use hub::{SensorHub, SubscriptionHandle};
pub use input::SensorInput;
pub use reconciler::{RateReconciler, ReconciledSample, ReconcilerConfig};
pub use synthetic::{
    builtin_sources, ManualSource, ManualSourceHandle, SignalFn, SyntheticSource,
};
pub use types::{
    ChannelKind, Emission, RateStrategy, SampleSink, SampleSource, SourceError, SourceRequest,
    SourceUnavailable,
};
