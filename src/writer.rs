use std::io::Result;

/// Positional writers a table can be saved to.
///
/// Writers must support writing arbitrary byte slices at fixed offsets without
/// altering shared state; this is satisfied by `FileExt` handles on both Unix
/// and Windows and by [`MemoryBuffer`](crate::MemoryBuffer).
pub trait PerfectHashWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> PerfectHashWriter for T {
    fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.write_all_at(data, offset)
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> PerfectHashWriter for T {
    fn write_at(&self, mut data: &[u8], mut offset: u64) -> Result<()> {
        while !data.is_empty() {
            let bytes = self.seek_write(data, offset)?;
            if bytes == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write whole buffer",
                ));
            }
            data = &data[bytes..];
            offset += bytes as u64;
        }
        Ok(())
    }
}
