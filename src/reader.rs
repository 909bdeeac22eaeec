use std::io::Result;

/// Positional read access to a persisted table.
///
/// Implementations must support reads at arbitrary offsets without mutating
/// shared state. The trait is blanket-implemented for platform-specific
/// `FileExt` handles and for [`MemoryBuffer`](crate::MemoryBuffer).
pub trait PerfectHashReader {
    /// Reads exactly `length` bytes starting at `offset` and passes them to `f`.
    ///
    /// Implementations must fail with `ErrorKind::UnexpectedEof` when the
    /// requested range extends past the end of the data.
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> PerfectHashReader for T {
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let mut buffer = vec![0u8; length as usize];
        std::os::unix::fs::FileExt::read_exact_at(self, &mut buffer, offset)?;
        Ok(f(&buffer))
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> PerfectHashReader for T {
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let mut buffer = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let bytes = self.seek_read(&mut buffer[filled..], offset + filled as u64)?;
            if bytes == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Failed to read enough bytes",
                ));
            }
            filled += bytes;
        }
        Ok(f(&buffer))
    }
}
