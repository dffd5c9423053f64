//! Rate reconciliation for a single source.
//!
//! Hardware delivers samples at whatever cadence it likes: in bursts, faster
//! than requested, or with gaps. The reconciler turns that stream into the
//! output cadence selected by the input's [`RateStrategy`]:
//!
//! - `Request` passes every sample through.
//! - `Auto` passes samples through until two consecutive gaps are shorter than
//!   90% of the requested rate, then switches to `Generate` for good.
//! - `Generate` averages samples per interval and emits exactly one value per
//!   interval, repeating the last average for intervals without samples.
//! - `Limit` averages samples and emits at most one value per interval,
//!   without catching up.
//!
//! After reconciliation a stride counter keeps only every Nth output.

use crate::source::types::{ChannelKind, RateStrategy};

/// Gaps shorter than this fraction of the rate count as "fast".
const FAST_GAP_FACTOR: f64 = 0.9;

/// Consecutive fast gaps that promote `Auto` to `Generate`.
const FAST_EVENTS_TO_GENERATE: u8 = 2;

/// Settings of one reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Output period in seconds (0 = native)
    pub rate: f64,
    pub strategy: RateStrategy,
    /// Keep every Nth output
    pub stride: u32,
    /// Average accumulated samples instead of keeping the latest
    pub average: bool,
    /// Kind of each channel, in emission order
    pub channels: Vec<ChannelKind>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            rate: 0.0,
            strategy: RateStrategy::Auto,
            stride: 1,
            average: true,
            channels: Vec::new(),
        }
    }
}

/// A value ready to be written to the input's buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledSample {
    /// Experiment time, seconds
    pub time: f64,
    pub values: Vec<Option<f64>>,
}

/// Per-channel running sums for one interval.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    sums: Vec<Option<f64>>,
    counts: Vec<u32>,
    latest: Vec<Option<f64>>,
    updates: u32,
    last_time: f64,
}

impl Accumulator {
    fn add(&mut self, kinds: &[ChannelKind], values: &[Option<f64>], t: f64) {
        if self.sums.len() < values.len() {
            self.sums.resize(values.len(), None);
            self.counts.resize(values.len(), 0);
            self.latest.resize(values.len(), None);
        }
        for (i, value) in values.iter().enumerate() {
            let Some(value) = *value else { continue };
            let kind = kinds.get(i).copied().unwrap_or_default();
            self.sums[i] = Some(match (kind, self.sums[i]) {
                (_, None) => value,
                (ChannelKind::Value, Some(sum)) => sum + value,
                (ChannelKind::Accuracy, Some(worst)) => worst.min(value),
            });
            self.counts[i] += 1;
            self.latest[i] = Some(value);
        }
        self.updates += 1;
        self.last_time = t;
    }

    fn is_empty(&self) -> bool {
        self.updates == 0
    }

    fn result(&self, kinds: &[ChannelKind], average: bool) -> Vec<Option<f64>> {
        if !average {
            return self.latest.clone();
        }
        self.sums
            .iter()
            .zip(&self.counts)
            .enumerate()
            .map(|(i, (sum, &count))| {
                let sum = (*sum)?;
                match kinds.get(i).copied().unwrap_or_default() {
                    ChannelKind::Value => Some(sum / f64::from(count)),
                    ChannelKind::Accuracy => Some(sum),
                }
            })
            .collect()
    }

    fn reset(&mut self) {
        self.sums.clear();
        self.counts.clear();
        self.latest.clear();
        self.updates = 0;
    }
}

/// Interval grid used by `Generate`: interval `k` starts at `origin + k * rate`.
#[derive(Debug, Clone, Copy)]
struct IntervalGrid {
    origin: f64,
    index: u64,
}

impl IntervalGrid {
    fn start(&self, rate: f64) -> f64 {
        self.origin + self.index as f64 * rate
    }

    fn end(&self, rate: f64) -> f64 {
        self.origin + (self.index + 1) as f64 * rate
    }
}

/// Rate-reconciliation state machine for one source input.
#[derive(Debug, Clone)]
pub struct RateReconciler {
    config: ReconcilerConfig,
    strategy: RateStrategy,
    last_sample_time: Option<f64>,
    last_written_time: Option<f64>,
    accumulator: Accumulator,
    grid: Option<IntervalGrid>,
    limit_start: Option<f64>,
    last_average: Option<Vec<Option<f64>>>,
    consecutive_fast_events: u8,
    stride_counter: u32,
}

impl RateReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        let strategy = config.strategy;
        Self {
            config,
            strategy,
            last_sample_time: None,
            last_written_time: None,
            accumulator: Accumulator::default(),
            grid: None,
            limit_start: None,
            last_average: None,
            consecutive_fast_events: 0,
            stride_counter: 0,
        }
    }

    /// Current strategy. May differ from the configured one after promotion.
    pub fn strategy(&self) -> RateStrategy {
        self.strategy
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Feed one sample at experiment time `t`.
    pub fn push(&mut self, values: &[Option<f64>], t: f64) -> Vec<ReconciledSample> {
        let accepted = self.last_sample_time.map_or(true, |last| t > last);

        let candidates = match self.effective_strategy() {
            RateStrategy::Request => vec![self.raw(values, t)],
            RateStrategy::Auto => {
                if accepted {
                    self.measure_gap(t);
                }
                if self.consecutive_fast_events >= FAST_EVENTS_TO_GENERATE {
                    self.promote_to_generate();
                    self.generate(values, t)
                } else {
                    vec![self.raw(values, t)]
                }
            }
            RateStrategy::Generate => self.generate(values, t),
            RateStrategy::Limit => self.limit(values, t),
        };

        if accepted {
            self.last_sample_time = Some(t);
        }
        self.apply_stride(candidates)
    }

    /// Flush whole `Generate` intervals that ended at least one interval
    /// before `now`, so output continues while the source is silent.
    pub fn tick(&mut self, now: f64) -> Vec<ReconciledSample> {
        if self.effective_strategy() != RateStrategy::Generate {
            return Vec::new();
        }
        let rate = self.config.rate;
        let mut out = Vec::new();
        while let Some(grid) = self.grid {
            if now < grid.start(rate) + 2.0 * rate {
                break;
            }
            if let Some(sample) = self.close_interval() {
                out.push(sample);
            }
        }
        self.apply_stride(out)
    }

    /// Drop all timing and averaging state. A promoted strategy is kept.
    pub fn clear(&mut self) {
        self.last_sample_time = None;
        self.last_written_time = None;
        self.accumulator.reset();
        self.grid = None;
        self.limit_start = None;
        self.last_average = None;
        self.consecutive_fast_events = 0;
        self.stride_counter = 0;
    }

    fn effective_strategy(&self) -> RateStrategy {
        if self.config.rate > 0.0 {
            self.strategy
        } else {
            RateStrategy::Request
        }
    }

    fn raw(&self, values: &[Option<f64>], t: f64) -> ReconciledSample {
        ReconciledSample {
            time: t,
            values: values.to_vec(),
        }
    }

    fn measure_gap(&mut self, t: f64) {
        let Some(last) = self.last_sample_time else {
            return;
        };
        if t - last < FAST_GAP_FACTOR * self.config.rate {
            self.consecutive_fast_events = self.consecutive_fast_events.saturating_add(1);
        } else {
            self.consecutive_fast_events = 0;
        }
    }

    fn promote_to_generate(&mut self) {
        tracing::info!(
            rate = self.config.rate,
            "Source delivers faster than requested, switching to generate strategy"
        );
        self.strategy = RateStrategy::Generate;
        self.consecutive_fast_events = 0;
        self.accumulator.reset();
        self.grid = None;
        self.last_average = None;
    }

    fn generate(&mut self, values: &[Option<f64>], t: f64) -> Vec<ReconciledSample> {
        let rate = self.config.rate;
        let Some(grid) = self.grid else {
            self.grid = Some(IntervalGrid { origin: t, index: 0 });
            self.accumulator.add(&self.config.channels, values, t);
            return Vec::new();
        };
        // A sample closes its interval as soon as it lands past the end. Only
        // `tick`, which has no sample to go on, waits one extra interval for
        // late deliveries before flushing.
        if t < grid.end(rate) {
            self.accumulator.add(&self.config.channels, values, t);
            return Vec::new();
        }

        // Close the current interval, then catch up on any whole intervals
        // that passed without samples.
        let mut out = Vec::new();
        while let Some(grid) = self.grid {
            if t < grid.end(rate) {
                break;
            }
            if let Some(sample) = self.close_interval() {
                out.push(sample);
            }
        }
        self.accumulator.add(&self.config.channels, values, t);
        out
    }

    /// Emit the current interval at its end time and advance the grid.
    fn close_interval(&mut self) -> Option<ReconciledSample> {
        let rate = self.config.rate;
        let grid = self.grid.as_mut()?;
        let time = grid.end(rate);
        grid.index += 1;

        if !self.accumulator.is_empty() {
            self.last_average = Some(
                self.accumulator
                    .result(&self.config.channels, self.config.average),
            );
            self.accumulator.reset();
        }
        self.last_average.clone().map(|values| ReconciledSample { time, values })
    }

    fn limit(&mut self, values: &[Option<f64>], t: f64) -> Vec<ReconciledSample> {
        let Some(start) = self.limit_start else {
            self.limit_start = Some(t);
            self.accumulator.add(&self.config.channels, values, t);
            return Vec::new();
        };
        if start + self.config.rate > t {
            self.accumulator.add(&self.config.channels, values, t);
            return Vec::new();
        }

        let mut out = Vec::new();
        if !self.accumulator.is_empty() {
            out.push(ReconciledSample {
                time: self.accumulator.last_time,
                values: self
                    .accumulator
                    .result(&self.config.channels, self.config.average),
            });
        }
        self.accumulator.reset();
        self.accumulator.add(&self.config.channels, values, t);
        self.limit_start = Some(t);
        out
    }

    fn apply_stride(&mut self, candidates: Vec<ReconciledSample>) -> Vec<ReconciledSample> {
        let stride = self.config.stride.max(1);
        let mut out = Vec::with_capacity(candidates.len());
        for mut sample in candidates {
            self.stride_counter += 1;
            if self.stride_counter < stride {
                continue;
            }
            self.stride_counter = 0;

            // Written times never move backwards for one source.
            if let Some(last) = self.last_written_time {
                if sample.time < last {
                    sample.time = last;
                }
            }
            self.last_written_time = Some(sample.time);
            out.push(sample);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler(strategy: RateStrategy, rate: f64, stride: u32) -> RateReconciler {
        RateReconciler::new(ReconcilerConfig {
            rate,
            strategy,
            stride,
            average: true,
            channels: vec![ChannelKind::Value],
        })
    }

    fn scalar(r: &mut RateReconciler, value: f64, t: f64) -> Vec<ReconciledSample> {
        r.push(&[Some(value)], t)
    }

    #[test]
    fn test_request_passthrough() {
        let mut r = reconciler(RateStrategy::Request, 0.1, 1);
        let out = scalar(&mut r, 4.0, 0.001);
        assert_eq!(
            out,
            vec![ReconciledSample {
                time: 0.001,
                values: vec![Some(4.0)]
            }]
        );
    }

    #[test]
    fn test_stride_keeps_every_nth() {
        let mut r = reconciler(RateStrategy::Request, 0.0, 3);
        let written: Vec<f64> = (0..7)
            .flat_map(|i| scalar(&mut r, f64::from(i), f64::from(i)))
            .map(|s| s.values[0].unwrap())
            .collect();
        assert_eq!(written, vec![2.0, 5.0]);
    }

    #[test]
    fn test_non_increasing_time_is_clamped() {
        let mut r = reconciler(RateStrategy::Request, 0.0, 1);
        scalar(&mut r, 1.0, 2.0);
        let out = scalar(&mut r, 2.0, 1.5);
        assert_eq!(out[0].time, 2.0);
        assert_eq!(out[0].values, vec![Some(2.0)]);
    }

    #[test]
    fn test_auto_promotes_after_two_fast_gaps() {
        let mut r = reconciler(RateStrategy::Auto, 0.01, 1);
        assert_eq!(scalar(&mut r, 1.0, 0.000).len(), 1);
        assert_eq!(scalar(&mut r, 1.0, 0.003).len(), 1);
        assert_eq!(r.strategy(), RateStrategy::Auto);

        // Second fast gap switches and starts a fresh interval.
        assert!(scalar(&mut r, 1.0, 0.006).is_empty());
        assert_eq!(r.strategy(), RateStrategy::Generate);
    }

    #[test]
    fn test_auto_slow_gap_resets_counter() {
        let mut r = reconciler(RateStrategy::Auto, 0.01, 1);
        scalar(&mut r, 1.0, 0.000);
        scalar(&mut r, 1.0, 0.003);
        scalar(&mut r, 1.0, 0.020);
        scalar(&mut r, 1.0, 0.023);
        assert_eq!(r.strategy(), RateStrategy::Auto);
    }

    #[test]
    fn test_generate_averages_interval() {
        let mut r = reconciler(RateStrategy::Generate, 0.1, 1);
        assert!(scalar(&mut r, 1.0, 0.00).is_empty());
        assert!(scalar(&mut r, 2.0, 0.05).is_empty());
        let out = scalar(&mut r, 9.0, 0.10);

        assert_eq!(out.len(), 1);
        assert!((out[0].time - 0.1).abs() < 1e-12);
        assert_eq!(out[0].values, vec![Some(1.5)]);
    }

    #[test]
    fn test_generate_catches_up() {
        let mut r = reconciler(RateStrategy::Generate, 0.1, 1);
        scalar(&mut r, 1.0, 0.0);
        let out = scalar(&mut r, 5.0, 0.35);

        let times: Vec<f64> = out.iter().map(|s| s.time).collect();
        assert_eq!(out.len(), 3);
        for (k, t) in times.iter().enumerate() {
            assert!((t - 0.1 * (k + 1) as f64).abs() < 1e-12);
        }
        assert!(out.iter().all(|s| s.values == vec![Some(1.0)]));
    }

    #[test]
    fn test_generate_tick_flushes_silent_intervals() {
        let mut r = reconciler(RateStrategy::Generate, 0.1, 1);
        scalar(&mut r, 2.0, 0.0);
        scalar(&mut r, 4.0, 0.05);

        // One interval of grace before ticking flushes.
        assert!(r.tick(0.15).is_empty());
        let out = r.tick(0.31);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values, vec![Some(3.0)]);
        assert_eq!(out[1].values, vec![Some(3.0)]);
        assert!((out[1].time - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_limit_does_not_catch_up() {
        let mut r = reconciler(RateStrategy::Limit, 0.1, 1);
        scalar(&mut r, 1.0, 0.0);
        scalar(&mut r, 3.0, 0.05);
        let out = scalar(&mut r, 10.0, 0.55);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].values, vec![Some(2.0)]);
        assert_eq!(out[0].time, 0.05);
        assert!(r.tick(5.0).is_empty());
    }

    #[test]
    fn test_accuracy_uses_minimum() {
        let mut r = RateReconciler::new(ReconcilerConfig {
            rate: 0.1,
            strategy: RateStrategy::Limit,
            stride: 1,
            average: true,
            channels: vec![ChannelKind::Value, ChannelKind::Accuracy],
        });
        r.push(&[Some(1.0), Some(3.0)], 0.0);
        r.push(&[Some(2.0), Some(1.0)], 0.02);
        r.push(&[Some(3.0), None], 0.04);
        let out = r.push(&[Some(0.0), Some(3.0)], 0.2);

        assert_eq!(out[0].values, vec![Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_non_averaging_keeps_latest() {
        let mut r = RateReconciler::new(ReconcilerConfig {
            rate: 0.1,
            strategy: RateStrategy::Limit,
            stride: 1,
            average: false,
            channels: vec![ChannelKind::Value],
        });
        r.push(&[Some(1.0)], 0.0);
        r.push(&[Some(7.0)], 0.05);
        let out = r.push(&[Some(0.0)], 0.1);
        assert_eq!(out[0].values, vec![Some(7.0)]);
    }

    #[test]
    fn test_clear_keeps_promoted_strategy() {
        let mut r = reconciler(RateStrategy::Auto, 0.01, 1);
        for i in 0..4 {
            scalar(&mut r, 1.0, f64::from(i) * 0.001);
        }
        assert_eq!(r.strategy(), RateStrategy::Generate);

        r.clear();
        assert_eq!(r.strategy(), RateStrategy::Generate);
        assert!(scalar(&mut r, 1.0, 10.0).is_empty());
    }
}
