use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one experiment session.
#[derive(Debug)]
pub struct AcquisitionStats {
    /// Emissions delivered by sources
    received: AtomicU64,
    /// Emissions carrying a source error
    dropped: AtomicU64,
    /// Samples older than the current time segment
    rejected: AtomicU64,
    /// Emissions lost because the acquisition queue was full
    overflowed: AtomicU64,
    /// Values appended to buffers by inputs
    values_written: AtomicU64,
    /// Failed buffer writes by inputs
    write_errors: AtomicU64,
    /// Completed analysis iterations
    analysis_iterations: AtomicU64,
    session_start: Mutex<DateTime<Utc>>,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
            values_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            analysis_iterations: AtomicU64::new(0),
            session_start: Mutex::new(Utc::now()),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_values_written(&self, count: u64) {
        self.values_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis_iteration(&self) {
        self.analysis_iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Restart the session clock used for the duration.
    pub fn mark_session_start(&self) {
        *self.session_start.lock() = Utc::now();
    }

    pub fn stats(&self) -> StatsSnapshot {
        let session_start = *self.session_start.lock();
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            values_written: self.values_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            analysis_iterations: self.analysis_iterations.load(Ordering::Relaxed),
            session_start,
            session_duration_secs: (Utc::now() - session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the CLI.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples received: {}\n\
             - Samples dropped (source errors): {}\n\
             - Samples rejected (stale): {}\n\
             - Samples lost (queue full): {}\n\
             - Values written: {}\n\
             - Write errors: {}\n\
             - Analysis iterations: {}\n\
             - Session duration: {} seconds",
            stats.received,
            stats.dropped,
            stats.rejected,
            stats.overflowed,
            stats.values_written,
            stats.write_errors,
            stats.analysis_iterations,
            stats.session_duration_secs
        )
    }

    /// Write a JSON snapshot to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.stats())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.overflowed.store(0, Ordering::Relaxed);
        self.values_written.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
        self.analysis_iterations.store(0, Ordering::Relaxed);
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub overflowed: u64,
    pub values_written: u64,
    pub write_errors: u64,
    pub analysis_iterations: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

pub type SharedAcquisitionStats = Arc<AcquisitionStats>;

pub fn create_shared_stats() -> SharedAcquisitionStats {
    Arc::new(AcquisitionStats::new())
}
