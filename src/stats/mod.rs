//! Acquisition and analysis counters.
//!
//! Counters are updated from source callbacks, the acquisition worker and the
//! analysis thread, so they are plain atomics read into a serializable
//! snapshot on demand.

pub mod counters;

pub use counters::{create_shared_stats, AcquisitionStats, SharedAcquisitionStats, StatsSnapshot};
