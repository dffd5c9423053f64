//! Sources that do not need hardware.
//!
//! [`ManualSource`] hands emissions straight from the caller to the session,
//! which makes it the test double for every platform source.
//! [`SyntheticSource`] generates a signal on its own thread, optionally in
//! bursts, the way many motion sensors deliver queued samples.

use crate::source::types::{Emission, SampleSink, SampleSource, SourceRequest, SourceUnavailable};
use crate::timebase::EventClock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A source driven by explicit calls to [`ManualSourceHandle::emit`].
pub struct ManualSource {
    id: String,
    available: bool,
    sink: Arc<Mutex<Option<SampleSink>>>,
    last_request: Arc<Mutex<Option<SourceRequest>>>,
}

/// Caller-side handle of a [`ManualSource`].
#[derive(Clone)]
pub struct ManualSourceHandle {
    sink: Arc<Mutex<Option<SampleSink>>>,
    last_request: Arc<Mutex<Option<SourceRequest>>>,
}

impl ManualSource {
    /// Create an available source and its handle.
    pub fn new(id: impl Into<String>) -> (Self, ManualSourceHandle) {
        let sink = Arc::new(Mutex::new(None));
        let last_request = Arc::new(Mutex::new(None));
        let handle = ManualSourceHandle {
            sink: Arc::clone(&sink),
            last_request: Arc::clone(&last_request),
        };
        (
            Self {
                id: id.into(),
                available: true,
                sink,
                last_request,
            },
            handle,
        )
    }

    /// Create a source whose `start` always fails.
    pub fn unavailable(id: impl Into<String>) -> Self {
        let (mut source, _) = Self::new(id);
        source.available = false;
        source
    }
}

impl SampleSource for ManualSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(
        &mut self,
        request: &SourceRequest,
        sink: SampleSink,
    ) -> Result<(), SourceUnavailable> {
        if !self.available {
            return Err(SourceUnavailable::new(&self.id, "sensor not present"));
        }
        *self.last_request.lock() = Some(*request);
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().take();
    }

    fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl ManualSourceHandle {
    /// Deliver an emission. Returns false if the source is not running.
    pub fn emit(&self, emission: Emission) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => {
                sink(emission);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Request the source was last started with.
    pub fn last_request(&self) -> Option<SourceRequest> {
        *self.last_request.lock()
    }
}

/// Signal generator: maps event time to channel values.
pub type SignalFn = Arc<dyn Fn(f64) -> Vec<Option<f64>> + Send + Sync>;

/// A source producing a generated signal on a background thread.
pub struct SyntheticSource {
    id: String,
    period: Duration,
    burst: usize,
    signal: SignalFn,
    clock: EventClock,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    /// Create a source delivering `burst` samples every `period`.
    ///
    /// Samples within a burst are stamped evenly across the period, so the
    /// effective sample rate is `burst / period`.
    pub fn new(
        id: impl Into<String>,
        period: Duration,
        burst: usize,
        clock: EventClock,
        signal: SignalFn,
    ) -> Self {
        Self {
            id: id.into(),
            period,
            burst: burst.max(1),
            signal,
            clock,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl SampleSource for SyntheticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(
        &mut self,
        _request: &SourceRequest,
        sink: SampleSink,
    ) -> Result<(), SourceUnavailable> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let period = self.period;
        let burst = self.burst;
        let clock = self.clock;
        let signal = Arc::clone(&self.signal);

        let handle = thread::Builder::new()
            .name(format!("source-{}", self.id))
            .spawn(move || {
                let step = period.as_secs_f64() / burst as f64;
                while running.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    let now = clock.now();
                    for i in 0..burst {
                        let t = now - step * (burst - 1 - i) as f64;
                        sink(Emission::new(signal(t), t));
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SourceUnavailable::new(&self.id, format!("could not spawn thread: {e}"))
            })?;

        self.thread_handle = Some(handle);
        tracing::debug!(source = %self.id, "Synthetic source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Generated stand-ins for common phone sensors, keyed by source id.
///
/// The accelerometer delivers bursts of three samples every 10 ms (300 Hz),
/// which exercises rate promotion in inputs requesting 100 Hz.
pub fn builtin_sources(clock: EventClock) -> Vec<SyntheticSource> {
    use std::f64::consts::TAU;

    let motion = |scale: f64, gravity: f64| -> SignalFn {
        Arc::new(move |t: f64| {
            Emission::vector(
                scale * (TAU * t).sin(),
                scale * (TAU * t).cos(),
                gravity + 0.1 * scale * (TAU * 5.0 * t).sin(),
                Some(3.0),
                t,
            )
            .values
        })
    };
    let scalar = |f: fn(f64) -> f64| -> SignalFn { Arc::new(move |t: f64| vec![Some(f(t))]) };

    vec![
        SyntheticSource::new(
            "accelerometer",
            Duration::from_millis(10),
            3,
            clock,
            motion(1.0, 9.81),
        ),
        SyntheticSource::new("gyroscope", Duration::from_millis(5), 1, clock, motion(0.5, 0.0)),
        SyntheticSource::new(
            "magnetometer",
            Duration::from_millis(20),
            1,
            clock,
            motion(20.0, -40.0),
        ),
        SyntheticSource::new(
            "pressure",
            Duration::from_millis(100),
            1,
            clock,
            scalar(|t| 1013.25 + 0.5 * (0.1 * t).sin()),
        ),
        SyntheticSource::new(
            "light",
            Duration::from_millis(50),
            1,
            clock,
            scalar(|t| 300.0 + 50.0 * (TAU * 0.5 * t).sin()),
        ),
        SyntheticSource::new(
            "sine",
            Duration::from_millis(10),
            1,
            clock,
            scalar(|t| (TAU * t).sin()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_manual_source_lifecycle() {
        let (mut source, handle) = ManualSource::new("acc");
        assert!(!handle.emit(Emission::scalar(1.0, 0.0)));

        let (tx, rx) = unbounded();
        let sink: SampleSink = Arc::new(move |e: Emission| {
            let _ = tx.send(e);
        });
        source.start(&SourceRequest::default(), sink).unwrap();
        assert!(handle.emit(Emission::scalar(1.0, 0.0)));
        assert_eq!(rx.try_recv().unwrap().values, vec![Some(1.0)]);

        source.stop();
        source.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_unavailable_source() {
        let mut source = ManualSource::unavailable("gps");
        let sink: SampleSink = Arc::new(|_: Emission| {});
        let err = source.start(&SourceRequest::default(), sink).unwrap_err();
        assert_eq!(err.source_id, "gps");
    }

    #[test]
    fn test_synthetic_source_bursts() {
        let (tx, rx) = unbounded();
        let sink: SampleSink = Arc::new(move |e: Emission| {
            let _ = tx.send(e);
        });
        let mut source = SyntheticSource::new(
            "sine",
            Duration::from_millis(5),
            3,
            EventClock::new(),
            Arc::new(|t: f64| vec![Some(t.sin())]),
        );
        source.start(&SourceRequest::default(), sink).unwrap();
        let first: Vec<Emission> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        source.stop();

        assert!(!source.is_running());
        assert!(first[0].event_time < first[1].event_time);
        assert!(first[1].event_time < first[2].event_time);
    }

    #[test]
    fn test_builtin_sources_have_unique_ids() {
        let sources = builtin_sources(EventClock::new());
        let mut ids: Vec<&str> = sources.iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), sources.len());
        assert!(ids.contains(&"accelerometer"));
    }
}
