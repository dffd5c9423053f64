//! The acquisition worker.
//!
//! Source callbacks only enqueue. A single worker thread owns every
//! [`SensorInput`] of a session and performs all buffer appends, so two
//! sources never interleave writes to the same buffer and a reconciler is
//! never touched from two threads.

use crate::buffer::BufferTable;
use crate::config::EngineConfig;
use crate::source::{Emission, SensorInput};
use crate::stats::SharedAcquisitionStats;
use crate::timebase::{EventClock, SharedTimeBase};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Messages accepted by the worker, processed in queue order.
#[derive(Debug)]
pub enum AcquisitionMessage {
    /// An emission for the input at this index
    Sample { input: usize, emission: Emission },
    /// Reply once everything queued before this message is processed
    Barrier(Sender<()>),
    Stop,
}

/// Shared state the worker writes through.
struct WorkerContext {
    buffers: Arc<BufferTable>,
    time_base: SharedTimeBase,
    stats: SharedAcquisitionStats,
    clock: EventClock,
    tick_interval: Duration,
    generate_ticks: bool,
}

/// Handle to a running acquisition worker.
pub struct AcquisitionWorker {
    tx: Sender<AcquisitionMessage>,
    thread_handle: Option<JoinHandle<Vec<SensorInput>>>,
}

impl AcquisitionWorker {
    pub fn spawn(
        inputs: Vec<SensorInput>,
        buffers: Arc<BufferTable>,
        time_base: SharedTimeBase,
        stats: SharedAcquisitionStats,
        clock: EventClock,
        config: &EngineConfig,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded(config.queue_capacity);
        let context = WorkerContext {
            buffers,
            time_base,
            stats,
            clock,
            tick_interval: config.tick_interval,
            generate_ticks: config.generate_ticks,
        };

        let handle = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || run(inputs, rx, context))?;

        Ok(Self {
            tx,
            thread_handle: Some(handle),
        })
    }

    /// Queue sender for source handlers.
    pub fn sender(&self) -> Sender<AcquisitionMessage> {
        self.tx.clone()
    }

    /// Block until every message queued so far has been processed.
    pub fn flush(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(AcquisitionMessage::Barrier(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Drain the queue, stop the thread and hand the inputs back.
    pub fn stop(mut self) -> Vec<SensorInput> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Vec<SensorInput> {
        let _ = self.tx.send(AcquisitionMessage::Stop);
        let Some(handle) = self.thread_handle.take() else {
            return Vec::new();
        };
        match handle.join() {
            Ok(inputs) => inputs,
            Err(_) => {
                tracing::error!("Acquisition thread panicked, inputs lost");
                Vec::new()
            }
        }
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut inputs: Vec<SensorInput>,
    rx: Receiver<AcquisitionMessage>,
    context: WorkerContext,
) -> Vec<SensorInput> {
    tracing::debug!(inputs = inputs.len(), "Acquisition worker started");
    let mut last_tick = Instant::now();

    loop {
        match rx.recv_timeout(context.tick_interval) {
            Ok(AcquisitionMessage::Sample { input, emission }) => match inputs.get_mut(input) {
                Some(target) => {
                    let time_base = context.time_base.read();
                    target.process(emission, &time_base, &context.buffers, &context.stats);
                }
                None => tracing::warn!(input, "Sample for unknown input"),
            },
            Ok(AcquisitionMessage::Barrier(reply)) => {
                let _ = reply.send(());
            }
            Ok(AcquisitionMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if context.generate_ticks && last_tick.elapsed() >= context.tick_interval {
            last_tick = Instant::now();
            let time_base = context.time_base.read();
            if !time_base.is_paused() {
                let now = time_base.translate(context.clock.now());
                for input in &mut inputs {
                    input.tick(now, &context.buffers, &context.stats);
                }
            }
        }
    }

    tracing::debug!("Acquisition worker stopped");
    inputs
}
