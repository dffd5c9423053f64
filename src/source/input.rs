//! Source inputs: the bridge from a source's emissions to experiment buffers.

use crate::buffer::{BufferHandle, BufferTable};
use crate::descriptor::{ConfigurationError, InputDescriptor};
use crate::source::reconciler::{RateReconciler, ReconciledSample, ReconcilerConfig};
use crate::source::types::{Emission, SourceRequest};
use crate::stats::AcquisitionStats;
use crate::timebase::TimeBase;

/// One experiment input bound to a source and a set of buffers.
#[derive(Debug)]
pub struct SensorInput {
    source_id: String,
    request: SourceRequest,
    reconciler: RateReconciler,
    time_buffer: Option<BufferHandle>,
    channel_buffers: Vec<Option<BufferHandle>>,
}

impl SensorInput {
    /// Resolve an input descriptor against the session's buffers.
    pub fn from_descriptor(
        descriptor: &InputDescriptor,
        buffers: &BufferTable,
    ) -> Result<Self, ConfigurationError> {
        let invalid = |detail: &str| ConfigurationError::InvalidInput {
            source_id: descriptor.source.clone(),
            detail: detail.to_string(),
        };
        if !descriptor.rate.is_finite() || descriptor.rate < 0.0 {
            return Err(invalid("rate must be a non-negative number of seconds"));
        }
        if descriptor.stride == 0 {
            return Err(invalid("stride must be at least 1"));
        }

        let time_buffer = descriptor
            .time
            .as_deref()
            .map(|name| buffers.writable_handle(name))
            .transpose()?;
        let channel_buffers = descriptor
            .channels
            .iter()
            .map(|channel| {
                channel
                    .buffer
                    .as_deref()
                    .map(|name| buffers.writable_handle(name))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = ReconcilerConfig {
            rate: descriptor.rate,
            strategy: descriptor.strategy,
            stride: descriptor.stride,
            average: descriptor.average,
            channels: descriptor.channels.iter().map(|c| c.kind).collect(),
        };

        Ok(Self {
            source_id: descriptor.source.clone(),
            request: SourceRequest {
                rate: descriptor.rate,
                strategy: descriptor.strategy,
            },
            reconciler: RateReconciler::new(config),
            time_buffer,
            channel_buffers,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn request(&self) -> &SourceRequest {
        &self.request
    }

    pub fn reconciler(&self) -> &RateReconciler {
        &self.reconciler
    }

    /// Handle one emission from the source.
    pub fn process(
        &mut self,
        emission: Emission,
        time_base: &TimeBase,
        buffers: &BufferTable,
        stats: &AcquisitionStats,
    ) {
        stats.record_received();
        if let Some(error) = emission.error {
            stats.record_dropped();
            tracing::warn!(source = %self.source_id, "Dropping sample: {}", error);
            return;
        }

        let t = time_base.translate(emission.event_time);
        if !time_base.accepts(t) {
            stats.record_rejected();
            tracing::trace!(source = %self.source_id, t, "Rejecting stale sample");
            return;
        }

        let samples = self.reconciler.push(&emission.values, t);
        self.write(&samples, buffers, stats);
    }

    /// Flush generated intervals up to experiment time `now`.
    pub fn tick(&mut self, now: f64, buffers: &BufferTable, stats: &AcquisitionStats) {
        let samples = self.reconciler.tick(now);
        self.write(&samples, buffers, stats);
    }

    /// Reset reconciliation state, e.g. after a pause.
    pub fn clear(&mut self) {
        self.reconciler.clear();
    }

    fn write(&self, samples: &[ReconciledSample], buffers: &BufferTable, stats: &AcquisitionStats) {
        for sample in samples {
            let mut written = 0;
            if let Some(handle) = self.time_buffer {
                written += self.append(buffers, handle, sample.time, stats);
            }
            for (handle, value) in self.channel_buffers.iter().zip(&sample.values) {
                if let (Some(handle), Some(value)) = (handle, value) {
                    written += self.append(buffers, *handle, *value, stats);
                }
            }
            stats.record_values_written(written);
        }
    }

    fn append(
        &self,
        buffers: &BufferTable,
        handle: BufferHandle,
        value: f64,
        stats: &AcquisitionStats,
    ) -> u64 {
        match buffers.get(handle).append(value) {
            Ok(()) => 1,
            Err(e) => {
                stats.record_write_error();
                tracing::error!(source = %self.source_id, "Buffer write failed: {}", e);
                0
            }
        }
    }
}
