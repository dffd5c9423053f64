//! Experiment sessions.
//!
//! A session owns everything one experiment needs while it runs: the buffer
//! table, the time base, the inputs, the analysis graph and the hub of sources
//! they read from. Stopping keeps the buffers; starting again resumes the
//! experiment clock where it stopped.

use crate::acquisition::{AcquisitionMessage, AcquisitionWorker};
use crate::analysis::{AnalysisGraph, AnalysisRunner};
use crate::buffer::{BufferTable, SharedBuffer};
use crate::config::EngineConfig;
use crate::descriptor::{ConfigurationError, ExperimentDescriptor};
use crate::source::{
    Emission, SampleSink, SensorHub, SensorInput, SourceUnavailable, SubscriptionHandle,
};
use crate::stats::{create_shared_stats, SharedAcquisitionStats};
use crate::timebase::{create_shared_time_base, SharedTimeBase, TimeBase};
use crossbeam_channel::TrySendError;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by session construction and control.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),

    #[error("Session is running")]
    AlreadyRunning,

    #[error("Could not spawn {thread} thread: {error}")]
    Spawn {
        thread: &'static str,
        #[source]
        error: std::io::Error,
    },
}

/// Resources held only while the session runs.
struct Running {
    worker: AcquisitionWorker,
    runner: Option<AnalysisRunner>,
    subscriptions: Vec<SubscriptionHandle>,
}

/// One loaded experiment.
pub struct ExperimentSession {
    id: Uuid,
    title: String,
    config: EngineConfig,
    hub: SensorHub,
    buffers: Arc<BufferTable>,
    time_base: SharedTimeBase,
    stats: SharedAcquisitionStats,
    // Idle-time homes of state the worker threads own while running.
    inputs: Vec<SensorInput>,
    graph: Option<AnalysisGraph>,
    running: Option<Running>,
}

impl ExperimentSession {
    /// Build every buffer, input and module of an experiment.
    ///
    /// Every input's source must already be registered with `hub`.
    pub fn new(
        descriptor: &ExperimentDescriptor,
        hub: SensorHub,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let spill_dir = config.spill_root.join(id.to_string());
        let buffers = Arc::new(BufferTable::build(&descriptor.buffers, &spill_dir)?);

        let inputs = descriptor
            .inputs
            .iter()
            .map(|input| {
                if !hub.contains(&input.source) {
                    return Err(ConfigurationError::UnknownSource(input.source.clone()));
                }
                SensorInput::from_descriptor(input, &buffers)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let graph = AnalysisGraph::from_descriptor(&descriptor.analysis, &buffers, &config)?;

        tracing::info!(
            session = %id,
            title = %descriptor.title,
            buffers = buffers.len(),
            inputs = inputs.len(),
            modules = graph.modules().len(),
            "Experiment loaded"
        );

        Ok(Self {
            id,
            title: descriptor.title.clone(),
            config,
            hub,
            buffers,
            time_base: create_shared_time_base(),
            stats: create_shared_stats(),
            inputs,
            graph: Some(graph),
            running: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start acquisition and the analysis loop now.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let now = self.hub.clock().now();
        self.start_at(now)
    }

    /// Start acquisition and the analysis loop at an event-clock time.
    pub fn start_at(&mut self, event_time: f64) -> Result<(), SessionError> {
        self.start_acquisition_at(event_time)?;
        if let Err(e) = self.spawn_analysis() {
            self.stop_at(event_time);
            return Err(e);
        }
        Ok(())
    }

    /// Start acquisition only. Analysis then runs on
    /// [`run_analysis_once`](Self::run_analysis_once).
    pub fn start_acquisition_at(&mut self, event_time: f64) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        self.time_base.write().start(event_time);
        if self.stats.stats().received == 0 {
            self.stats.mark_session_start();
        }

        let inputs = std::mem::take(&mut self.inputs);
        let requests: Vec<_> = inputs
            .iter()
            .map(|input| (input.source_id().to_string(), *input.request()))
            .collect();

        let worker = match AcquisitionWorker::spawn(
            inputs,
            Arc::clone(&self.buffers),
            Arc::clone(&self.time_base),
            Arc::clone(&self.stats),
            self.hub.clock(),
            &self.config,
        ) {
            Ok(worker) => worker,
            Err(error) => {
                self.time_base.write().pause(event_time);
                return Err(SessionError::Spawn {
                    thread: "acquisition",
                    error,
                });
            }
        };

        let mut subscriptions = Vec::with_capacity(requests.len());
        for (index, (source_id, request)) in requests.iter().enumerate() {
            let receiver = format!("{}/input{}", self.title, index);
            let handler = self.handler(&worker, index);
            match self.hub.subscribe(source_id, &receiver, request, handler) {
                Ok(handle) => subscriptions.push(handle),
                Err(e) => {
                    tracing::error!(session = %self.id, "Refusing to start: {}", e);
                    for handle in subscriptions {
                        self.hub.unsubscribe(handle);
                    }
                    self.inputs = worker.stop();
                    self.time_base.write().pause(event_time);
                    return Err(e.into());
                }
            }
        }

        self.running = Some(Running {
            worker,
            runner: None,
            subscriptions,
        });
        tracing::info!(session = %self.id, event_time, "Session started");
        Ok(())
    }

    fn handler(&self, worker: &AcquisitionWorker, input: usize) -> SampleSink {
        let tx = worker.sender();
        let stats = Arc::clone(&self.stats);
        Arc::new(move |emission: Emission| {
            match tx.try_send(AcquisitionMessage::Sample { input, emission }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => stats.record_overflow(),
                Err(TrySendError::Disconnected(_)) => {}
            }
        })
    }

    fn spawn_analysis(&mut self) -> Result<(), SessionError> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        let Some(graph) = self.graph.take() else {
            return Ok(());
        };
        if graph.is_empty() {
            self.graph = Some(graph);
            return Ok(());
        }
        // The graph moves into the thread, so rebuild a copy to keep on failure.
        let fallback = graph.clone();
        match AnalysisRunner::spawn(graph, Arc::clone(&self.buffers), Arc::clone(&self.stats)) {
            Ok(runner) => {
                running.runner = Some(runner);
                Ok(())
            }
            Err(error) => {
                self.graph = Some(fallback);
                Err(SessionError::Spawn {
                    thread: "analysis",
                    error,
                })
            }
        }
    }

    /// Stop now. Stopping a stopped session does nothing.
    pub fn stop(&mut self) {
        let now = self.hub.clock().now();
        self.stop_at(now);
    }

    /// Stop at an event-clock time.
    ///
    /// Sources are unsubscribed, queued samples are drained, the analysis loop
    /// finishes its current iteration, reconcilers are cleared and the time
    /// base is paused so the next start adds a new anchor.
    pub fn stop_at(&mut self, event_time: f64) {
        let Some(running) = self.running.take() else {
            return;
        };

        for handle in running.subscriptions {
            self.hub.unsubscribe(handle);
        }
        let mut inputs = running.worker.stop();
        for input in &mut inputs {
            input.clear();
        }
        self.inputs = inputs;

        if let Some(runner) = running.runner {
            if let Some(graph) = runner.stop() {
                self.graph = Some(graph);
            }
        }

        self.time_base.write().pause(event_time);
        tracing::info!(session = %self.id, event_time, "Session stopped");
    }

    /// Wait until every sample delivered so far has been written.
    pub fn flush(&self) {
        if let Some(running) = &self.running {
            running.worker.flush();
        }
    }

    /// Run the analysis graph once on the calling thread.
    ///
    /// Returns false if the analysis loop owns the graph or the require-fill
    /// buffer is not full yet.
    pub fn run_analysis_once(&self) -> bool {
        let Some(graph) = &self.graph else {
            return false;
        };
        let ran = graph.run_iteration(&self.buffers);
        if ran {
            self.stats.record_analysis_iteration();
        }
        ran
    }

    /// Restore every buffer to its seed, clear counters and restart the
    /// experiment clock at zero on the next start.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        self.buffers.reset_all();
        self.stats.reset();
        *self.time_base.write() = TimeBase::new();
        for input in &mut self.inputs {
            input.clear();
        }
        tracing::info!(session = %self.id, "Session reset");
        Ok(())
    }

    pub fn buffers(&self) -> &Arc<BufferTable> {
        &self.buffers
    }

    pub fn buffer(&self, name: &str) -> Option<&Arc<SharedBuffer>> {
        self.buffers.by_name(name)
    }

    pub fn stats(&self) -> &SharedAcquisitionStats {
        &self.stats
    }

    pub fn time_base(&self) -> &SharedTimeBase {
        &self.time_base
    }

    pub fn hub(&self) -> &SensorHub {
        &self.hub
    }
}

impl Drop for ExperimentSession {
    fn drop(&mut self) {
        self.stop();
    }
}
