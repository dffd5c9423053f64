//! Shared buffers.
//!
//! Buffers are the only state shared between acquisition and analysis. Each
//! buffer has its own reader/writer lock; there are no cross-buffer
//! transactions.

pub mod shared;
pub mod spill;
pub mod table;

pub use shared::SharedBuffer;
pub use spill::SpillFile;
pub use table::{BufferHandle, BufferTable};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many values a buffer keeps and what happens on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferCapacity {
    /// Keep at most `n` values, evicting the oldest
    Bounded(usize),
    /// Keep everything in memory
    Unbounded,
    /// Keep at most `n` values in memory, spilling older ones to disk
    Hybrid(usize),
}

impl Default for BufferCapacity {
    fn default() -> Self {
        BufferCapacity::Bounded(1)
    }
}

impl BufferCapacity {
    /// In-memory limit, if any.
    pub fn memory_limit(&self) -> Option<usize> {
        match self {
            BufferCapacity::Bounded(n) | BufferCapacity::Hybrid(n) => Some((*n).max(1)),
            BufferCapacity::Unbounded => None,
        }
    }
}

/// Errors raised by buffer writes.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Buffer '{0}' is static and cannot be modified")]
    StaticBuffer(String),

    #[error("Spill storage for buffer '{buffer}' failed: {error}")]
    Spill {
        buffer: String,
        #[source]
        error: std::io::Error,
    },
}
