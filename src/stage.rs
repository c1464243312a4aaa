//! Pipeline stage: owns one prime and filters its input for the next stage.
//!
//! # Lifecycle
//!
//! ```text
//! AwaitFirst ──► Filtering ──► Draining ──► ChildReaped ──► Done
//!      │                                                     ▲
//!      └──────────── empty input / not a candidate ──────────┘
//! ```
//!
//! - **AwaitFirst**: read one value. End-of-stream means there is nothing
//!   left to sieve. Otherwise the value is this stage's prime; the stage
//!   launches its child on a fresh channel and records `prime P`.
//! - **Filtering**: forward every value not divisible by the prime.
//! - **Draining**: close the output (the child sees end-of-stream), release
//!   the input, then reap the child.
//!
//! The output is always closed before the child is reaped. Reaping first
//! would leave the child blocked on a channel that never ends.
//!
//! Every stage runs this same code whatever its depth. On failure the stage
//! releases both channel ends and still reaps its child before reporting.

use crate::backend::{StageHandle, StageLauncher};
use crate::channel::{ValueReader, ValueWriter};
use crate::error::{Result, ResultExt, SieveError};
use crate::record;
use std::io::{Read, Write};

/// Smallest value a stage will accept as its prime
pub const MIN_CANDIDATE: i32 = 2;

/// Stage states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    AwaitFirst,
    Filtering,
    Draining,
    ChildReaped,
    Done,
}

/// Summary of a finished stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// The prime this stage owned, if it got one
    pub prime: Option<i32>,
    /// Values handed to the child
    pub forwarded: u64,
    /// Values dropped as multiples (or skipped while draining)
    pub discarded: u64,
}

/// One pipeline stage
pub struct Stage<R: Read, O: Write, L: StageLauncher> {
    state: StageState,
    input: Option<ValueReader<R>>,
    record: O,
    launcher: L,
    ceiling: Option<i32>,
    prime: Option<i32>,
    output: Option<ValueWriter<L::Writer>>,
    child: Option<L::Handle>,
    forwarded: u64,
    discarded: u64,
}

impl<R: Read, O: Write, L: StageLauncher> Stage<R, O, L> {
    /// Stage reading from `input`, recording to `record`, launching its
    /// child through `launcher`
    pub fn new(input: R, record: O, launcher: L) -> Self {
        Self {
            state: StageState::AwaitFirst,
            input: Some(ValueReader::new(input)),
            record,
            launcher,
            ceiling: None,
            prime: None,
            output: None,
            child: None,
            forwarded: 0,
            discarded: 0,
        }
    }

    /// Values at or above `ceiling` are never taken as a prime
    pub fn with_ceiling(mut self, ceiling: impl Into<Option<i32>>) -> Self {
        self.ceiling = ceiling.into();
        self
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn prime(&self) -> Option<i32> {
        self.prime
    }

    /// Run to completion
    pub fn run(mut self) -> Result<StageReport> {
        while self.state != StageState::Done {
            if let Err(e) = self.step() {
                return Err(self.abandon(e));
            }
        }

        let report = self.report();
        tracing::debug!(
            "Stage {:?} done: forwarded {}, discarded {}",
            report.prime,
            report.forwarded,
            report.discarded
        );
        Ok(report)
    }

    /// Perform the work of the current state and move to the next one.
    ///
    /// On error the caller must [`abandon`](Self::abandon) the stage.
    pub fn step(&mut self) -> Result<StageState> {
        let next = match self.state {
            StageState::AwaitFirst => self.await_first()?,
            StageState::Filtering => self.filter()?,
            StageState::Draining => self.drain()?,
            StageState::ChildReaped | StageState::Done => StageState::Done,
        };

        if next != self.state {
            tracing::trace!("Stage {:?}: {:?} -> {:?}", self.prime, self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    /// Release both channel ends, reap the child if there is one, and finish.
    ///
    /// Returns the error to report. When `err` is only the broken pipe left
    /// by a dead child, the child's own failure is reported instead.
    pub fn abandon(&mut self, err: SieveError) -> SieveError {
        drop(self.output.take());
        // A process stage's stdin lock does not close fd 0; exiting does
        self.input = None;
        self.state = StageState::Done;

        let Some(mut child) = self.child.take() else {
            return err;
        };
        match child.reap() {
            Ok(()) => err,
            Err(child_err) if err.is_broken_pipe() => child_err,
            Err(child_err) => {
                tracing::warn!("Child {} also failed: {}", child.label(), child_err);
                err
            }
        }
    }

    fn report(&self) -> StageReport {
        StageReport {
            prime: self.prime,
            forwarded: self.forwarded,
            discarded: self.discarded,
        }
    }

    fn await_first(&mut self) -> Result<StageState> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| SieveError::Channel("stage input already released".to_string()))?;

        let first = match input.recv().context("Reading first value")? {
            Some(value) => value,
            None => {
                self.input = None;
                return Ok(StageState::Done);
            }
        };

        let above_ceiling = self.ceiling.is_some_and(|c| first >= c);
        if first < MIN_CANDIDATE || above_ceiling {
            tracing::debug!("Value {} is not a candidate, draining input", first);
            self.discarded = 1 + input.drain().context("Draining input")?;
            self.input = None;
            return Ok(StageState::Done);
        }

        // The child must exist before anything is forwarded
        let (writer, child) = self
            .launcher
            .launch()
            .with_context(|| format!("Stage {}", first))?;
        self.output = Some(ValueWriter::new(writer));
        self.child = Some(child);
        self.prime = Some(first);

        record::emit_prime(&mut self.record, first).context("Writing record")?;
        Ok(StageState::Filtering)
    }

    fn filter(&mut self) -> Result<StageState> {
        let (Some(prime), Some(input), Some(output)) =
            (self.prime, self.input.as_mut(), self.output.as_mut())
        else {
            return Err(SieveError::Channel(
                "filtering without a prime or channel".to_string(),
            ));
        };

        while let Some(value) = input.recv().context("Reading input")? {
            if value % prime != 0 {
                output
                    .send(value)
                    .with_context(|| format!("Forwarding {}", value))?;
            } else {
                tracing::trace!("Stage {} drops {}", prime, value);
                self.discarded += 1;
            }
        }

        Ok(StageState::Draining)
    }

    fn drain(&mut self) -> Result<StageState> {
        let output = self
            .output
            .take()
            .ok_or_else(|| SieveError::Channel("stage output already released".to_string()))?;
        self.forwarded = output.close().context("Closing output")?;
        self.input = None;

        let mut child = self
            .child
            .take()
            .ok_or_else(|| SieveError::Channel("no child to reap".to_string()))?;
        child.reap()?;

        Ok(StageState::ChildReaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockStageHandle;
    use crate::record::SharedRecord;
    use std::io;
    use std::sync::{Arc, Mutex, Weak};

    /// Write end whose bytes stay inspectable after it is released
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn values(&self) -> Vec<i32> {
            let bytes = self.0.lock().unwrap();
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
    }

    struct CaptureWriter {
        buf: Arc<Mutex<Vec<u8>>>,
        // Dropped together with the writer so tests can see when it is released
        _alive: Arc<()>,
        // Behave like a pipe whose reader is gone
        broken: bool,
    }

    impl Write for CaptureWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.buf.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Launcher handing out one capture writer and one mock handle
    struct ScriptedLauncher {
        capture: Capture,
        alive: Mutex<Option<Arc<()>>>,
        handle: Mutex<Option<MockStageHandle>>,
        fail: bool,
        broken: bool,
    }

    impl ScriptedLauncher {
        fn new() -> (Self, Capture, Weak<()>) {
            let capture = Capture::default();
            let alive = Arc::new(());
            let weak = Arc::downgrade(&alive);
            let launcher = Self {
                capture: capture.clone(),
                alive: Mutex::new(Some(alive)),
                handle: Mutex::new(None),
                fail: false,
                broken: false,
            };
            (launcher, capture, weak)
        }

        fn with_handle(self, handle: MockStageHandle) -> Self {
            *self.handle.lock().unwrap() = Some(handle);
            self
        }

        /// Every write to the child fails with `BrokenPipe`
        fn with_broken_pipe(mut self) -> Self {
            self.broken = true;
            self
        }

        fn failing() -> Self {
            Self {
                capture: Capture::default(),
                alive: Mutex::new(None),
                handle: Mutex::new(None),
                fail: true,
                broken: false,
            }
        }
    }

    impl StageLauncher for ScriptedLauncher {
        type Writer = CaptureWriter;
        type Handle = MockStageHandle;

        fn launch(&self) -> Result<(CaptureWriter, MockStageHandle)> {
            if self.fail {
                return Err(SieveError::Spawn("process table full".to_string()));
            }
            let handle = self.handle.lock().unwrap().take().expect("launched twice");
            let alive = self.alive.lock().unwrap().take().expect("launched twice");
            let writer = CaptureWriter {
                buf: self.capture.0.clone(),
                _alive: alive,
                broken: self.broken,
            };
            Ok((writer, handle))
        }
    }

    fn encode(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn reaped_once_after_close(alive: Weak<()>) -> MockStageHandle {
        let mut handle = MockStageHandle::new();
        handle.expect_label().return_const("mock".to_string());
        handle.expect_reap().times(1).returning(move || {
            assert!(
                alive.upgrade().is_none(),
                "output must be released before the child is reaped"
            );
            Ok(())
        });
        handle
    }

    #[test]
    fn test_filters_multiples_of_first_value() {
        let (launcher, capture, alive) = ScriptedLauncher::new();
        let launcher = launcher.with_handle(reaped_once_after_close(alive));

        let input = encode(&[3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let record = SharedRecord::new();
        let report = Stage::new(input.as_slice(), record.clone(), launcher)
            .run()
            .unwrap();

        assert_eq!(record.contents(), "prime 3\n");
        assert_eq!(capture.values(), vec![4, 5, 7, 8, 10, 11]);
        assert_eq!(
            report,
            StageReport {
                prime: Some(3),
                forwarded: 6,
                discarded: 3,
            }
        );
    }

    #[test]
    fn test_empty_input_spawns_nothing() {
        let launcher = ScriptedLauncher::failing();
        let record = SharedRecord::new();
        let mut stage = Stage::new(io::empty(), record.clone(), launcher);

        assert_eq!(stage.step().unwrap(), StageState::Done);
        assert_eq!(stage.prime(), None);
        assert!(record.contents().is_empty());
    }

    #[test]
    fn test_state_sequence() {
        let (launcher, _capture, alive) = ScriptedLauncher::new();
        let launcher = launcher.with_handle(reaped_once_after_close(alive));

        let input = encode(&[2, 3, 4]);
        let mut stage = Stage::new(input.as_slice(), SharedRecord::new(), launcher);

        assert_eq!(stage.state(), StageState::AwaitFirst);
        assert_eq!(stage.step().unwrap(), StageState::Filtering);
        assert_eq!(stage.prime(), Some(2));
        assert_eq!(stage.step().unwrap(), StageState::Draining);
        assert_eq!(stage.step().unwrap(), StageState::ChildReaped);
        assert_eq!(stage.step().unwrap(), StageState::Done);
    }

    #[test]
    fn test_single_value_still_spawns_and_reaps() {
        let (launcher, capture, alive) = ScriptedLauncher::new();
        let launcher = launcher.with_handle(reaped_once_after_close(alive));

        let input = encode(&[2]);
        let record = SharedRecord::new();
        let report = Stage::new(input.as_slice(), record.clone(), launcher)
            .run()
            .unwrap();

        assert_eq!(record.primes(), vec![2]);
        assert!(capture.values().is_empty());
        assert_eq!(report.forwarded, 0);
    }

    #[test]
    fn test_ceiling_stops_stage() {
        let launcher = ScriptedLauncher::failing();
        let input = encode(&[35, 37, 41]);
        let record = SharedRecord::new();
        let report = Stage::new(input.as_slice(), record.clone(), launcher)
            .with_ceiling(35)
            .run()
            .unwrap();

        assert!(record.contents().is_empty());
        assert_eq!(report.prime, None);
        assert_eq!(report.discarded, 3);
    }

    #[test]
    fn test_non_candidate_first_value_is_skipped() {
        let input = encode(&[1, 2, 3]);
        let launcher = ScriptedLauncher::failing();
        let report = Stage::new(input.as_slice(), SharedRecord::new(), launcher)
            .run()
            .unwrap();

        assert_eq!(report.prime, None);
        assert_eq!(report.discarded, 3);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let input = encode(&[2, 3]);
        let record = SharedRecord::new();
        let err = Stage::new(input.as_slice(), record.clone(), ScriptedLauncher::failing())
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("process table full"));
        assert!(record.contents().is_empty());
    }

    #[test]
    fn test_child_failure_propagates() {
        let (launcher, _capture, _alive) = ScriptedLauncher::new();
        let mut handle = MockStageHandle::new();
        handle.expect_label().return_const("mock".to_string());
        handle.expect_reap().times(1).returning(|| {
            Err(SieveError::StageFailed {
                stage: "mock".to_string(),
                status: "exit status: 1".to_string(),
            })
        });
        let launcher = launcher.with_handle(handle);

        let input = encode(&[5, 6, 7]);
        let err = Stage::new(input.as_slice(), SharedRecord::new(), launcher)
            .run()
            .unwrap_err();

        assert!(matches!(err, SieveError::StageFailed { .. }));
    }

    #[test]
    fn test_broken_pipe_reports_child_failure() {
        let (launcher, _capture, _alive) = ScriptedLauncher::new();
        let mut handle = MockStageHandle::new();
        handle.expect_label().return_const("mock".to_string());
        handle.expect_reap().times(1).returning(|| {
            Err(SieveError::StageFailed {
                stage: "mock".to_string(),
                status: "exit status: 3".to_string(),
            })
        });
        let launcher = launcher.with_handle(handle).with_broken_pipe();

        let input = encode(&[2, 3, 5, 7, 9]);
        let record = SharedRecord::new();
        let err = Stage::new(input.as_slice(), record.clone(), launcher)
            .run()
            .unwrap_err();

        assert!(matches!(err, SieveError::StageFailed { .. }));
        assert!(err.to_string().contains("exit status: 3"));
        assert_eq!(record.primes(), vec![2]);
    }

    #[test]
    fn test_record_failure_still_reaps_child() {
        struct ClosedRecord;
        impl Write for ClosedRecord {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (launcher, _capture, alive) = ScriptedLauncher::new();
        let launcher = launcher.with_handle(reaped_once_after_close(alive));

        let input = encode(&[2, 3]);
        let err = Stage::new(input.as_slice(), ClosedRecord, launcher)
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("Writing record"));
    }
}
