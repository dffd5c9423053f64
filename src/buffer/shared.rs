//! A named, append-only numeric buffer shared between threads.

use crate::buffer::{BufferCapacity, BufferError, SpillFile};
use crate::descriptor::BufferDescriptor;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::Path;

#[derive(Debug)]
struct BufferState {
    memory: VecDeque<f64>,
    spill: Option<SpillFile>,
    version: u64,
}

/// Bounded or spilling sequence of `f64` values.
///
/// One writer at a time, any number of readers. `last()` only takes the read
/// lock, so it never observes a partially applied write.
#[derive(Debug)]
pub struct SharedBuffer {
    name: String,
    capacity: BufferCapacity,
    is_static: bool,
    default: Option<f64>,
    seed: Vec<f64>,
    state: RwLock<BufferState>,
}

impl SharedBuffer {
    /// Create a buffer from its descriptor.
    ///
    /// `spill_dir` is only used by hybrid buffers.
    pub fn from_descriptor(
        descriptor: &BufferDescriptor,
        spill_dir: &Path,
    ) -> Result<Self, BufferError> {
        let spill = match descriptor.capacity {
            BufferCapacity::Hybrid(_) if !descriptor.is_static => Some(
                SpillFile::create(spill_dir, &descriptor.name).map_err(|error| {
                    BufferError::Spill {
                        buffer: descriptor.name.clone(),
                        error,
                    }
                })?,
            ),
            _ => None,
        };

        let buffer = Self {
            name: descriptor.name.clone(),
            capacity: descriptor.capacity,
            is_static: descriptor.is_static,
            default: descriptor.default,
            seed: descriptor.seed.clone(),
            state: RwLock::new(BufferState {
                memory: VecDeque::new(),
                spill,
                version: 0,
            }),
        };
        {
            let mut state = buffer.state.write();
            buffer.push_locked(&mut state, &descriptor.seed)?;
        }
        Ok(buffer)
    }

    /// Create an in-memory buffer without a descriptor.
    pub fn in_memory(name: impl Into<String>, capacity: BufferCapacity) -> Self {
        let capacity = match capacity {
            BufferCapacity::Hybrid(n) => BufferCapacity::Bounded(n),
            other => other,
        };
        Self {
            name: name.into(),
            capacity,
            is_static: false,
            default: None,
            seed: Vec::new(),
            state: RwLock::new(BufferState {
                memory: VecDeque::new(),
                spill: None,
                version: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> BufferCapacity {
        self.capacity
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Append one value.
    pub fn append(&self, value: f64) -> Result<(), BufferError> {
        self.append_all(&[value])
    }

    /// Append values under a single lock acquisition.
    pub fn append_all(&self, values: &[f64]) -> Result<(), BufferError> {
        self.ensure_writable()?;
        let mut state = self.state.write();
        self.push_locked(&mut state, values)
    }

    /// Replace the whole contents under a single lock acquisition.
    pub fn replace(&self, values: &[f64]) -> Result<(), BufferError> {
        self.ensure_writable()?;
        let mut state = self.state.write();
        self.clear_locked(&mut state);
        self.push_locked(&mut state, values)
    }

    /// Most recent value, falling back to the declared default.
    pub fn last(&self) -> Option<f64> {
        self.state.read().memory.back().copied().or(self.default)
    }

    /// Empty the buffer. Static buffers are left untouched.
    pub fn clear(&self) {
        if self.is_static {
            return;
        }
        let mut state = self.state.write();
        self.clear_locked(&mut state);
    }

    /// Restore the seeded contents. Static buffers are left untouched.
    pub fn reset(&self) {
        if self.is_static {
            return;
        }
        let mut state = self.state.write();
        self.clear_locked(&mut state);
        if let Err(e) = self.push_locked(&mut state, &self.seed) {
            tracing::error!(buffer = %self.name, "Failed to restore seed values: {}", e);
        }
    }

    /// Full logical contents, spilled values first.
    pub fn to_array(&self) -> Vec<f64> {
        let mut state = self.state.write();
        let mut values = match state.spill.as_mut() {
            Some(spill) if !spill.is_empty() => match spill.read_all() {
                Ok(values) => values,
                Err(e) => {
                    tracing::error!(buffer = %self.name, "Failed to read spill file: {}", e);
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        values.extend(state.memory.iter().copied());
        values
    }

    /// The most recent `n` values held in memory, oldest first.
    pub fn recent(&self, n: usize) -> Vec<f64> {
        let state = self.state.read();
        let skip = state.memory.len().saturating_sub(n);
        state.memory.iter().skip(skip).copied().collect()
    }

    /// Logical number of values, including spilled ones.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.memory.len() + state.spill.as_ref().map_or(0, SpillFile::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.state.read().memory.len()
    }

    /// Whether the in-memory part has reached its limit.
    pub fn is_full(&self) -> bool {
        match self.capacity.memory_limit() {
            Some(limit) => self.memory_len() >= limit,
            None => false,
        }
    }

    /// Counter bumped on every modification.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    fn ensure_writable(&self) -> Result<(), BufferError> {
        if self.is_static {
            tracing::error!(buffer = %self.name, "Rejected write to static buffer");
            return Err(BufferError::StaticBuffer(self.name.clone()));
        }
        Ok(())
    }

    fn push_locked(&self, state: &mut BufferState, values: &[f64]) -> Result<(), BufferError> {
        if values.is_empty() {
            return Ok(());
        }
        state.memory.extend(values.iter().copied());
        state.version += 1;

        let Some(limit) = self.capacity.memory_limit() else {
            return Ok(());
        };
        let excess = state.memory.len().saturating_sub(limit);
        if excess == 0 {
            return Ok(());
        }

        let evicted: Vec<f64> = state.memory.drain(..excess).collect();
        if let Some(spill) = state.spill.as_mut() {
            if let Err(error) = spill.push_all(&evicted) {
                // Keep the values in memory rather than lose them.
                for value in evicted.into_iter().rev() {
                    state.memory.push_front(value);
                }
                return Err(BufferError::Spill {
                    buffer: self.name.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    fn clear_locked(&self, state: &mut BufferState) {
        state.memory.clear();
        if let Some(spill) = state.spill.as_mut() {
            if let Err(e) = spill.truncate() {
                tracing::warn!(buffer = %self.name, "Failed to truncate spill file: {}", e);
            }
        }
        state.version += 1;
    }
}
