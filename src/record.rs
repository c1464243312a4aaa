//! The observable result of the pipeline: one `prime <value>` line per stage.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Prefix of every record line
pub const RECORD_PREFIX: &str = "prime";

/// Write one record line and flush it.
///
/// The flush matters: a stage must commit its line before forwarding any
/// value, otherwise a downstream stage could print first.
pub fn emit_prime<W: Write>(out: &mut W, prime: i32) -> io::Result<()> {
    writeln!(out, "{} {}", RECORD_PREFIX, prime)?;
    out.flush()
}

/// Parse a single record line
pub fn parse_line(line: &str) -> Option<i32> {
    let value = line.trim_end().strip_prefix(RECORD_PREFIX)?.strip_prefix(' ')?;
    value.parse().ok()
}

/// Parse every record line of an output, skipping anything else
pub fn parse_output(output: &str) -> Vec<i32> {
    output.lines().filter_map(parse_line).collect()
}

/// In-memory record shared by every stage of a thread-backed pipeline
#[derive(Debug, Clone, Default)]
pub struct SharedRecord {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, as text
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Primes recorded so far, in write order
    pub fn primes(&self) -> Vec<i32> {
        parse_output(&self.contents())
    }
}

impl Write for SharedRecord {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
