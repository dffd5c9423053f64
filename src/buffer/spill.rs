//! On-disk overflow storage for hybrid buffers.
//!
//! A spill file is a flat sequence of little-endian IEEE-754 doubles, written
//! append-only in the order values left memory. A batch is either stored
//! whole or not at all: a failed write truncates the file back to the last
//! complete batch.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Extension used for every spill file.
pub const SPILL_EXTENSION: &str = "spill";

/// Append-only file of evicted buffer values.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    file: File,
    len: usize,
    // Set when a failed write could not be rolled back yet.
    needs_truncate: bool,
}

impl SpillFile {
    /// Create (or truncate) the spill file for `buffer_name` inside `dir`.
    pub fn create(dir: &Path, buffer_name: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(buffer_name));

        File::create(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            len: 0,
            needs_truncate: false,
        })
    }

    /// Deterministic file name for a buffer.
    ///
    /// The name is hex-encoded so distinct buffer names never collide.
    pub fn file_name(buffer_name: &str) -> String {
        let encoded: String = buffer_name.bytes().map(|b| format!("{b:02x}")).collect();
        format!("{encoded}.{SPILL_EXTENSION}")
    }

    /// Append values in order, all of them or none.
    pub fn push_all(&mut self, values: &[f64]) -> io::Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if self.needs_truncate {
            self.rollback()?;
        }

        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        if let Err(error) = self.file.write_all(&bytes) {
            if let Err(e) = self.rollback() {
                tracing::warn!(path = %self.path.display(), "Spill rollback deferred: {}", e);
            }
            return Err(error);
        }
        self.len += values.len();
        Ok(())
    }

    /// Read back every spilled value in original order.
    pub fn read_all(&mut self) -> io::Result<Vec<f64>> {
        let bytes = std::fs::read(&self.path)?;
        Ok(bytes
            .chunks_exact(8)
            .take(self.len)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect())
    }

    /// Discard all spilled values.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.len = 0;
        self.needs_truncate = false;
        Ok(())
    }

    /// Cut the file back to the values counted in `len`.
    fn rollback(&mut self) -> io::Result<()> {
        self.needs_truncate = true;
        self.file.set_len(self.len as u64 * 8)?;
        self.needs_truncate = false;
        Ok(())
    }

    /// Swap in a read-only handle so the next write fails.
    #[cfg(test)]
    pub(crate) fn make_unwritable(&mut self) -> io::Result<()> {
        self.file = File::open(&self.path)?;
        Ok(())
    }

    /// Reopen the file for appending after [`make_unwritable`](Self::make_unwritable).
    #[cfg(test)]
    pub(crate) fn make_writable(&mut self) -> io::Result<()> {
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    /// Number of spilled values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_deterministic() {
        assert_eq!(SpillFile::file_name("ab"), "6162.spill");
        assert_ne!(SpillFile::file_name("a b"), SpillFile::file_name("a_b"));
    }

    #[test]
    fn test_push_and_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = SpillFile::create(dir.path(), "acc").unwrap();

        spill.push_all(&[1.0, 2.5]).unwrap();
        spill.push_all(&[-3.0, f64::NAN]).unwrap();

        let values = spill.read_all().unwrap();
        assert_eq!(spill.len(), 4);
        assert_eq!(&values[..3], &[1.0, 2.5, -3.0]);
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_failed_write_keeps_only_complete_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = SpillFile::create(dir.path(), "acc").unwrap();
        spill.push_all(&[1.0]).unwrap();

        // Half a value reached the disk before the write failed.
        let mut stray = OpenOptions::new().append(true).open(spill.path()).unwrap();
        stray.write_all(&[0xff; 4]).unwrap();
        spill.make_unwritable().unwrap();
        assert!(spill.push_all(&[2.0]).is_err());
        assert_eq!(spill.len(), 1);
        assert_eq!(spill.read_all().unwrap(), vec![1.0]);

        spill.make_writable().unwrap();
        spill.push_all(&[3.0]).unwrap();
        assert_eq!(spill.read_all().unwrap(), vec![1.0, 3.0]);
        assert_eq!(std::fs::metadata(spill.path()).unwrap().len(), 16);
    }

    #[test]
    fn test_truncate_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = SpillFile::create(dir.path(), "acc").unwrap();
        spill.push_all(&[1.0]).unwrap();
        spill.truncate().unwrap();
        spill.push_all(&[7.0]).unwrap();
        assert_eq!(spill.read_all().unwrap(), vec![7.0]);

        let path = spill.path().to_path_buf();
        drop(spill);
        assert!(!path.exists());
    }
}
