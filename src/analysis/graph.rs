//! The analysis graph and the thread that runs it.

use crate::analysis::module::Module;
use crate::buffer::{BufferHandle, BufferTable};
use crate::config::EngineConfig;
use crate::descriptor::{ConfigurationError, GraphDescriptor};
use crate::stats::SharedAcquisitionStats;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Ordered modules plus their scheduling settings.
#[derive(Debug, Clone)]
pub struct AnalysisGraph {
    modules: Vec<Module>,
    sleep: Duration,
    dynamic_sleep: Option<BufferHandle>,
    min_dynamic_sleep: Duration,
    require_fill: Option<BufferHandle>,
}

impl AnalysisGraph {
    pub fn from_descriptor(
        descriptor: &GraphDescriptor,
        buffers: &BufferTable,
        config: &EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        let sleep = match descriptor.sleep {
            None => config.default_sleep,
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                ConfigurationError::InvalidGraph(format!(
                    "sleep must be a non-negative number of seconds, got {secs}"
                ))
            })?,
        };
        let dynamic_sleep = descriptor
            .dynamic_sleep
            .as_deref()
            .map(|name| buffers.handle(name))
            .transpose()?;
        let require_fill = descriptor
            .require_fill
            .as_deref()
            .map(|name| buffers.handle(name))
            .transpose()?;
        let modules = descriptor
            .modules
            .iter()
            .map(|m| Module::from_descriptor(m, buffers))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            modules,
            sleep,
            dynamic_sleep,
            min_dynamic_sleep: config.min_dynamic_sleep,
            require_fill,
        })
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Run every module once, in declaration order.
    ///
    /// Returns false without running anything while the require-fill buffer
    /// is not yet full.
    pub fn run_iteration(&self, buffers: &BufferTable) -> bool {
        if let Some(handle) = self.require_fill {
            if !buffers.get(handle).is_full() {
                return false;
            }
        }
        for module in &self.modules {
            module.execute(buffers);
        }
        true
    }

    /// Delay before the next iteration.
    ///
    /// A dynamic sleep buffer overrides the fixed sleep with its last value in
    /// seconds, never going below the configured minimum. Values that are not
    /// a representable duration fall back to the fixed sleep.
    pub fn next_sleep(&self, buffers: &BufferTable) -> Duration {
        let Some(handle) = self.dynamic_sleep else {
            return self.sleep;
        };
        let dynamic = buffers
            .get(handle)
            .last()
            .filter(|secs| secs.is_finite())
            .and_then(|secs| Duration::try_from_secs_f64(secs.max(0.0)).ok());
        dynamic.unwrap_or(self.sleep).max(self.min_dynamic_sleep)
    }
}

/// Background loop running an [`AnalysisGraph`] until stopped.
pub struct AnalysisRunner {
    stop_tx: Sender<()>,
    thread_handle: Option<JoinHandle<AnalysisGraph>>,
}

impl AnalysisRunner {
    /// Spawn the analysis thread. The first iteration runs immediately.
    pub fn spawn(
        graph: AnalysisGraph,
        buffers: Arc<BufferTable>,
        stats: SharedAcquisitionStats,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("analysis".into())
            .spawn(move || {
                tracing::debug!(modules = graph.modules.len(), "Analysis loop started");
                loop {
                    if graph.run_iteration(&buffers) {
                        stats.record_analysis_iteration();
                    }
                    match stop_rx.recv_timeout(graph.next_sleep(&buffers)) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Analysis loop stopped");
                graph
            })?;

        Ok(Self {
            stop_tx,
            thread_handle: Some(handle),
        })
    }

    /// Signal the loop and wait for the in-flight iteration to finish.
    ///
    /// Returns the graph so it can be run again later.
    pub fn stop(mut self) -> Option<AnalysisGraph> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<AnalysisGraph> {
        let _ = self.stop_tx.try_send(());
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(graph) => Some(graph),
            Err(_) => {
                tracing::error!("Analysis thread panicked");
                None
            }
        }
    }
}

impl Drop for AnalysisRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferCapacity;
    use crate::descriptor::{BufferDescriptor, ModuleDescriptor, ModuleInputDescriptor};
    use crate::stats::create_shared_stats;

    fn table(dir: &std::path::Path) -> BufferTable {
        BufferTable::build(
            &[
                BufferDescriptor::new("a", BufferCapacity::Bounded(3)),
                BufferDescriptor::new("sum", BufferCapacity::Unbounded),
                BufferDescriptor::new("delay", BufferCapacity::Bounded(1)),
            ],
            dir,
        )
        .unwrap()
    }

    fn counting_graph() -> GraphDescriptor {
        GraphDescriptor {
            sleep: Some(0.001),
            dynamic_sleep: None,
            require_fill: None,
            modules: vec![ModuleDescriptor::new("add")
                .input(ModuleInputDescriptor::Value(1.0))
                .output("sum", false)],
        }
    }

    #[test]
    fn test_require_fill_gates_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = table(dir.path());
        let mut descriptor = counting_graph();
        descriptor.require_fill = Some("a".into());
        let graph =
            AnalysisGraph::from_descriptor(&descriptor, &buffers, &EngineConfig::default())
                .unwrap();

        assert!(!graph.run_iteration(&buffers));
        buffers.by_name("a").unwrap().append_all(&[1.0, 2.0, 3.0]).unwrap();
        assert!(graph.run_iteration(&buffers));
        assert_eq!(buffers.by_name("sum").unwrap().len(), 1);
    }

    #[test]
    fn test_dynamic_sleep_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = table(dir.path());
        let mut descriptor = counting_graph();
        descriptor.dynamic_sleep = Some("delay".into());
        let config = EngineConfig::default();
        let graph = AnalysisGraph::from_descriptor(&descriptor, &buffers, &config).unwrap();

        assert_eq!(graph.next_sleep(&buffers), config.min_dynamic_sleep);
        buffers.by_name("delay").unwrap().append(0.5).unwrap();
        assert_eq!(graph.next_sleep(&buffers), Duration::from_millis(500));
        buffers.by_name("delay").unwrap().append(0.0).unwrap();
        assert_eq!(graph.next_sleep(&buffers), config.min_dynamic_sleep);
    }

    #[test]
    fn test_unrepresentable_dynamic_sleep_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = table(dir.path());
        let mut descriptor = counting_graph();
        descriptor.sleep = Some(0.25);
        descriptor.dynamic_sleep = Some("delay".into());
        let graph =
            AnalysisGraph::from_descriptor(&descriptor, &buffers, &EngineConfig::default())
                .unwrap();

        for secs in [1e20, f64::INFINITY, f64::NAN] {
            buffers.by_name("delay").unwrap().append(secs).unwrap();
            assert_eq!(graph.next_sleep(&buffers), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_huge_binning_span_does_not_stop_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = table(dir.path());
        buffers.by_name("a").unwrap().append_all(&[-1e300, 1e300]).unwrap();
        let descriptor = GraphDescriptor {
            sleep: None,
            dynamic_sleep: None,
            require_fill: None,
            modules: vec![ModuleDescriptor::new("binning")
                .input(ModuleInputDescriptor::buffer("a"))
                .output("sum", true)
                .output("delay", true)],
        };
        let graph =
            AnalysisGraph::from_descriptor(&descriptor, &buffers, &EngineConfig::default())
                .unwrap();

        assert!(graph.run_iteration(&buffers));
        assert!(buffers.by_name("sum").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_sleep_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = table(dir.path());
        for secs in [-1.0, 1e20, f64::INFINITY, f64::NAN] {
            let mut descriptor = counting_graph();
            descriptor.sleep = Some(secs);
            assert!(matches!(
                AnalysisGraph::from_descriptor(&descriptor, &buffers, &EngineConfig::default()),
                Err(ConfigurationError::InvalidGraph(_))
            ));
        }
    }

    #[test]
    fn test_runner_iterates_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = Arc::new(table(dir.path()));
        let stats = create_shared_stats();
        let graph =
            AnalysisGraph::from_descriptor(&counting_graph(), &buffers, &EngineConfig::default())
                .unwrap();

        let runner = AnalysisRunner::spawn(graph, Arc::clone(&buffers), Arc::clone(&stats)).unwrap();
        thread::sleep(Duration::from_millis(50));
        let graph = runner.stop().unwrap();

        let iterations = stats.stats().analysis_iterations;
        assert!(iterations >= 2);
        assert_eq!(buffers.by_name("sum").unwrap().len() as u64, iterations);
        assert_eq!(graph.modules().len(), 1);
    }
}
