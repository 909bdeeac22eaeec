use std::io::{Error, ErrorKind, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{PerfectHashReader, PerfectHashWriter};

/// Growable in-memory sink and source for persisted tables.
///
/// Writes past the current end zero-fill the gap, mirroring sparse file
/// semantics, so a table can be saved to memory and loaded back without
/// touching the file system.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    data: Mutex<Vec<u8>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Vec<u8>> for MemoryBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl PerfectHashWriter for MemoryBuffer {
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "offset exceeds address space"))?;
        let end = start.checked_add(buf.len()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput, "write end exceeds address space")
        })?;

        let mut data = self.lock();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

impl PerfectHashReader for MemoryBuffer {
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let data = self.lock();
        let range = offset
            .checked_add(length)
            .filter(|&end| end <= data.len() as u64)
            .map(|end| offset as usize..end as usize)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "read of {length} bytes at offset {offset} exceeds buffer of {} bytes",
                        data.len()
                    ),
                )
            })?;
        Ok(f(&data[range]))
    }
}
