//! Experiment time base.
//!
//! Sources stamp samples with their own event clock. The time base maps those
//! stamps onto experiment time, which starts at zero and does not advance
//! while the experiment is paused. Each start or resume adds an anchor; the
//! most recent anchor at or before an event time decides its translation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One anchor of the mapping between event time and experiment time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeMapping {
    /// Event clock reading, seconds
    pub event_time: f64,
    /// Experiment time at that instant, seconds
    pub experiment_time: f64,
    /// Wall clock at that instant
    pub system_time: DateTime<Utc>,
}

/// Maps event timestamps to experiment time across pause/resume cycles.
#[derive(Debug, Clone, Default)]
pub struct TimeBase {
    mappings: Vec<TimeMapping>,
    paused_at: Option<(f64, f64)>,
    total_pause_gap: f64,
}

impl TimeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first anchor. Later calls behave like a resume.
    pub fn start(&mut self, event_time: f64) {
        if self.mappings.is_empty() {
            self.push_anchor(event_time, 0.0);
            tracing::debug!(event_time, "Time base started");
        } else {
            self.mark_pause_resume(event_time);
        }
    }

    /// Freeze experiment time at `event_time`.
    pub fn pause(&mut self, event_time: f64) {
        if self.paused_at.is_some() || self.mappings.is_empty() {
            return;
        }
        let experiment_time = self.translate(event_time);
        self.paused_at = Some((event_time, experiment_time));
        tracing::debug!(event_time, experiment_time, "Time base paused");
    }

    /// Add an anchor so experiment time continues where it stopped.
    pub fn mark_pause_resume(&mut self, event_time: f64) {
        let Some(last) = self.mappings.last().copied() else {
            self.push_anchor(event_time, 0.0);
            return;
        };

        let (paused_event, paused_experiment) = self
            .paused_at
            .take()
            .unwrap_or_else(|| (event_time, self.translate(event_time)));
        let gap = (event_time - paused_event).max(0.0);
        self.total_pause_gap += gap;

        // Never move an anchor backwards in either coordinate.
        let anchor_event = event_time.max(last.event_time);
        let anchor_experiment = paused_experiment.max(last.experiment_time);
        self.push_anchor(anchor_event, anchor_experiment);
        tracing::debug!(
            event_time = anchor_event,
            experiment_time = anchor_experiment,
            gap,
            "Time base resumed"
        );
    }

    /// Translate an event timestamp to experiment time.
    pub fn translate(&self, event_time: f64) -> f64 {
        match self.mapping_for(event_time) {
            Some(m) => m.experiment_time + (event_time - m.event_time),
            None => event_time,
        }
    }

    /// Translate a wall-clock timestamp to experiment time.
    pub fn translate_system(&self, system_time: DateTime<Utc>) -> f64 {
        let mapping = self
            .mappings
            .iter()
            .rev()
            .find(|m| m.system_time <= system_time)
            .or_else(|| self.mappings.first());
        match mapping {
            Some(m) => {
                let delta = system_time - m.system_time;
                let secs = delta
                    .num_microseconds()
                    .map_or(delta.num_milliseconds() as f64 / 1e3, |us| us as f64 / 1e6);
                m.experiment_time + secs
            }
            None => 0.0,
        }
    }

    /// Whether a translated time may be written.
    ///
    /// Times before the last anchor belong to a segment that already ended.
    pub fn accepts(&self, experiment_time: f64) -> bool {
        match self.mappings.last() {
            Some(m) => experiment_time >= m.experiment_time,
            None => true,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Experiment time of the most recent anchor.
    pub fn last_anchor_time(&self) -> f64 {
        self.mappings.last().map_or(0.0, |m| m.experiment_time)
    }

    pub fn total_pause_gap(&self) -> f64 {
        self.total_pause_gap
    }

    pub fn mappings(&self) -> &[TimeMapping] {
        &self.mappings
    }

    fn mapping_for(&self, event_time: f64) -> Option<&TimeMapping> {
        self.mappings
            .iter()
            .rev()
            .find(|m| m.event_time <= event_time)
            .or_else(|| self.mappings.first())
    }

    fn push_anchor(&mut self, event_time: f64, experiment_time: f64) {
        self.mappings.push(TimeMapping {
            event_time,
            experiment_time,
            system_time: Utc::now(),
        });
    }
}

/// Time base shared between the acquisition worker and session control.
pub type SharedTimeBase = Arc<RwLock<TimeBase>>;

/// Create a new shared time base.
pub fn create_shared_time_base() -> SharedTimeBase {
    Arc::new(RwLock::new(TimeBase::new()))
}

/// Monotonic event clock in seconds since its creation.
///
/// Clones share the same origin.
#[derive(Debug, Clone, Copy)]
pub struct EventClock {
    origin: Instant,
}

impl EventClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}
