//! Fixed-width integer framing for stage channels.
//!
//! Every value travels as [`VALUE_WIDTH`] bytes in native byte order. The
//! encoding is private to the pipeline: both ends always run the same build.
//!
//! A read that ends partway through a value is treated as end-of-stream, the
//! same as a clean close. Only genuine I/O errors are reported.

use std::io::{self, BufWriter, ErrorKind, Read, Write};

/// Bytes per encoded value
pub const VALUE_WIDTH: usize = std::mem::size_of::<i32>();

/// Reading end of a channel
pub struct ValueReader<R: Read> {
    inner: R,
    values_read: u64,
}

impl<R: Read> ValueReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            values_read: 0,
        }
    }

    /// Read the next value, or `None` at end-of-stream.
    pub fn recv(&mut self) -> io::Result<Option<i32>> {
        let mut buf = [0u8; VALUE_WIDTH];
        let mut filled = 0;

        while filled < VALUE_WIDTH {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        match filled {
            VALUE_WIDTH => {
                self.values_read += 1;
                Ok(Some(i32::from_ne_bytes(buf)))
            }
            0 => Ok(None),
            partial => {
                tracing::debug!(
                    "Truncated value ({} of {} bytes) treated as end-of-stream",
                    partial,
                    VALUE_WIDTH
                );
                Ok(None)
            }
        }
    }

    /// Consume the rest of the stream, returning how many values were skipped
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut skipped = 0;
        while self.recv()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Number of complete values read so far
    pub fn values_read(&self) -> u64 {
        self.values_read
    }
}

/// Writing end of a channel.
///
/// Writes are buffered; [`ValueWriter::close`] flushes and releases the
/// underlying writer so the reader observes end-of-stream. Dropping the
/// writer without closing also releases it, discarding flush errors.
pub struct ValueWriter<W: Write> {
    inner: BufWriter<W>,
    values_written: u64,
}

impl<W: Write> ValueWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            values_written: 0,
        }
    }

    /// Queue one value for the reader
    pub fn send(&mut self, value: i32) -> io::Result<()> {
        self.inner.write_all(&value.to_ne_bytes())?;
        self.values_written += 1;
        Ok(())
    }

    /// Flush pending values and release the write end
    pub fn close(self) -> io::Result<u64> {
        let written = self.values_written;
        let inner = self.inner.into_inner().map_err(|e| e.into_error())?;
        drop(inner);
        Ok(written)
    }

    /// Number of values accepted so far
    pub fn values_written(&self) -> u64 {
        self.values_written
    }
}
