//! Thread-per-stage backend
//!
//! Runs the pipeline inside one process: each stage is a named thread, each
//! channel an in-memory byte pipe built on an unbounded crossbeam channel,
//! and the record is a [`SharedRecord`]. Stages see the same `Read`/`Write`
//! surface as with OS pipes, so the stage state machine is unchanged.
//!
//! # End-of-stream
//!
//! A [`PipeReader`] returns `Ok(0)` once every [`PipeWriter`] for its channel
//! has been dropped and buffered chunks are consumed. Writing after the
//! reader is gone fails with `BrokenPipe`, like a real pipe.
//!
//! # Resource accounting
//!
//! [`ResourceCounters`] tracks open channel ends and live stages. After a
//! feeder returns both must be back at zero.

use super::{StageHandle, StageLauncher};
use crate::error::{Result, SieveError};
use crate::record::SharedRecord;
use crate::stage::{Stage, StageReport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Default)]
struct Counts {
    launched: AtomicUsize,
    live_stages: AtomicUsize,
    open_ends: AtomicUsize,
}

/// Shared counters for stages and channel ends
#[derive(Debug, Clone, Default)]
pub struct ResourceCounters {
    counts: Arc<Counts>,
}

impl ResourceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages launched since creation
    pub fn launched(&self) -> usize {
        self.counts.launched.load(Ordering::SeqCst)
    }

    /// Stages whose thread has not finished yet
    pub fn live_stages(&self) -> usize {
        self.counts.live_stages.load(Ordering::SeqCst)
    }

    /// Channel ends (readers and writers) not yet released
    pub fn open_ends(&self) -> usize {
        self.counts.open_ends.load(Ordering::SeqCst)
    }

    fn open_end(&self) -> EndGuard {
        self.counts.open_ends.fetch_add(1, Ordering::SeqCst);
        EndGuard {
            counters: self.clone(),
        }
    }

    fn start_stage(&self) -> (usize, StageGuard) {
        let index = self.counts.launched.fetch_add(1, Ordering::SeqCst);
        self.counts.live_stages.fetch_add(1, Ordering::SeqCst);
        (
            index,
            StageGuard {
                counters: self.clone(),
            },
        )
    }
}

#[derive(Debug)]
struct EndGuard {
    counters: ResourceCounters,
}

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.counters.counts.open_ends.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct StageGuard {
    counters: ResourceCounters,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.counters.counts.live_stages.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Write end of an in-memory byte pipe
#[derive(Debug)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
    _end: EndGuard,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "pipe reader released"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end of an in-memory byte pipe
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
    _end: EndGuard,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // All writers released
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Create an in-memory pipe whose ends are tracked by `counters`
pub fn byte_pipe(counters: &ResourceCounters) -> (PipeWriter, PipeReader) {
    let (tx, rx) = unbounded();
    let writer = PipeWriter {
        tx,
        _end: counters.open_end(),
    };
    let reader = PipeReader {
        rx,
        chunk: Vec::new(),
        pos: 0,
        _end: counters.open_end(),
    };
    (writer, reader)
}

/// Launches stages as threads of the current process
#[derive(Debug, Clone)]
pub struct ThreadLauncher {
    record: SharedRecord,
    ceiling: Option<i32>,
    counters: ResourceCounters,
}

impl ThreadLauncher {
    /// Launch stages that append their lines to `record`
    pub fn new(record: SharedRecord) -> Self {
        Self {
            record,
            ceiling: None,
            counters: ResourceCounters::new(),
        }
    }

    /// Pass a ceiling to every launched stage
    pub fn with_ceiling(mut self, ceiling: impl Into<Option<i32>>) -> Self {
        self.ceiling = ceiling.into();
        self
    }

    pub fn counters(&self) -> &ResourceCounters {
        &self.counters
    }
}

impl StageLauncher for ThreadLauncher {
    type Writer = PipeWriter;
    type Handle = ThreadHandle;

    fn launch(&self) -> Result<(PipeWriter, ThreadHandle)> {
        let (writer, reader) = byte_pipe(&self.counters);
        let (index, guard) = self.counters.start_stage();
        let stage =
            Stage::new(reader, self.record.clone(), self.clone()).with_ceiling(self.ceiling);

        let join = std::thread::Builder::new()
            .name(format!("sieve-stage-{}", index))
            .spawn(move || {
                let _guard = guard;
                stage.run()
            })
            .map_err(|e| SieveError::Spawn(format!("stage thread {}: {}", index, e)))?;

        tracing::debug!("Launched stage thread {}", index);
        let handle = ThreadHandle {
            index,
            join: Some(join),
        };
        Ok((writer, handle))
    }
}

/// Handle to a stage thread
#[derive(Debug)]
pub struct ThreadHandle {
    index: usize,
    join: Option<JoinHandle<Result<StageReport>>>,
}

impl ThreadHandle {
    /// Launch order of the stage, starting at zero
    pub fn index(&self) -> usize {
        self.index
    }
}

impl StageHandle for ThreadHandle {
    fn label(&self) -> String {
        format!("thread {}", self.index)
    }

    fn reap(&mut self) -> Result<()> {
        let join = self.join.take().ok_or_else(|| SieveError::Reap {
            stage: self.label(),
            message: "already reaped".to_string(),
        })?;

        match join.join() {
            Ok(Ok(_report)) => Ok(()),
            Ok(Err(e)) => Err(e.with_context(format!("Stage {}", self.label()))),
            Err(_) => Err(SieveError::Reap {
                stage: self.label(),
                message: "stage thread panicked".to_string(),
            }),
        }
    }
}
