//! Session-owned table of buffers addressed by name or handle.

use crate::buffer::{BufferError, SharedBuffer};
use crate::descriptor::{BufferDescriptor, ConfigurationError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Index of a buffer inside its [`BufferTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Removes the per-session spill directory once every spill file is gone.
#[derive(Debug)]
struct SpillDirGuard(PathBuf);

impl Drop for SpillDirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(&self.0);
    }
}

/// All buffers of one experiment session.
///
/// The table itself is immutable after construction; the buffers inside it
/// synchronize their own contents.
#[derive(Debug)]
pub struct BufferTable {
    buffers: Vec<Arc<SharedBuffer>>,
    index: HashMap<String, BufferHandle>,
    // Declared after `buffers` so spill files are removed before the directory.
    _spill_dir: SpillDirGuard,
}

impl BufferTable {
    /// Build every declared buffer. Names must be unique.
    pub fn build(
        descriptors: &[BufferDescriptor],
        spill_dir: &Path,
    ) -> Result<Self, ConfigurationError> {
        let mut buffers = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if index.contains_key(&descriptor.name) {
                return Err(ConfigurationError::DuplicateBuffer(descriptor.name.clone()));
            }
            let buffer = SharedBuffer::from_descriptor(descriptor, spill_dir).map_err(|e| {
                match e {
                    BufferError::Spill { buffer, error } => ConfigurationError::Spill { buffer, error },
                    BufferError::StaticBuffer(name) => ConfigurationError::StaticTarget(name),
                }
            })?;
            index.insert(descriptor.name.clone(), BufferHandle(buffers.len()));
            buffers.push(Arc::new(buffer));
        }

        tracing::debug!(count = buffers.len(), dir = %spill_dir.display(), "Built buffer table");

        Ok(Self {
            buffers,
            index,
            _spill_dir: SpillDirGuard(spill_dir.to_path_buf()),
        })
    }

    /// Resolve a buffer name.
    pub fn handle(&self, name: &str) -> Result<BufferHandle, ConfigurationError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownBuffer(name.to_string()))
    }

    /// Resolve a buffer name that will be written at runtime.
    pub fn writable_handle(&self, name: &str) -> Result<BufferHandle, ConfigurationError> {
        let handle = self.handle(name)?;
        if self.get(handle).is_static() {
            return Err(ConfigurationError::StaticTarget(name.to_string()));
        }
        Ok(handle)
    }

    pub fn get(&self, handle: BufferHandle) -> &Arc<SharedBuffer> {
        &self.buffers[handle.0]
    }

    /// Read-only access by name for export and UI consumers.
    pub fn by_name(&self, name: &str) -> Option<&Arc<SharedBuffer>> {
        self.index.get(name).map(|handle| &self.buffers[handle.0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SharedBuffer>> {
        self.buffers.iter()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Restore every buffer to its seeded contents.
    pub fn reset_all(&self) {
        for buffer in &self.buffers {
            buffer.reset();
        }
    }
}
