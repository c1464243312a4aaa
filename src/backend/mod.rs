//! Stage backends
//!
//! A backend knows how to start a new pipeline stage and how to wait for it.
//! The stage logic in [`crate::stage`] only sees the two traits below, so the
//! same state machine runs at every depth of the pipeline regardless of where
//! stages actually execute.
//!
//! # Components
//!
//! - [`StageLauncher`] - Starts a stage on the read end of a fresh channel and
//!   hands back the write end plus a handle
//! - [`StageHandle`] - Owner of a running stage, supporting one blocking reap
//! - [`ProcessLauncher`] - One operating system process per stage (the default)
//! - [`ThreadLauncher`] - One thread per stage over in-memory byte pipes, used
//!   for tests, benchmarks and `--backend thread`
//!
//! # Channel ownership
//!
//! `launch` creates the channel. The read end moves into the new stage and
//! never comes back; the write end is returned to the caller, which is its
//! only writer and must release it before calling [`StageHandle::reap`].
//!
//! # Example
//!
//! ```ignore
//! use pipe_sieve::backend::{ProcessLauncher, StageHandle, StageLauncher};
//!
//! let launcher = ProcessLauncher::current_exe()?.with_ceiling(35);
//! let (writer, mut stage) = launcher.launch()?;
//!
//! // Feed values through `writer`, then release it
//! drop(writer);
//!
//! stage.reap()?;
//! ```

pub mod process;
pub mod thread;

pub use process::{ProcessHandle, ProcessLauncher, CEILING_FLAG, STAGE_SUBCOMMAND};
pub use thread::{
    byte_pipe, PipeReader, PipeWriter, ResourceCounters, ThreadHandle, ThreadLauncher,
};

use crate::error::Result;
use std::io::Write;

/// Owner of a running stage
#[cfg_attr(test, mockall::automock)]
pub trait StageHandle {
    /// Identity used in logs and error messages
    fn label(&self) -> String;

    /// Block until the stage terminates.
    ///
    /// Returns an error if the stage could not be waited for or finished
    /// unsuccessfully. Must be called at most once.
    fn reap(&mut self) -> Result<()>;
}

/// Starts new stages
pub trait StageLauncher {
    /// Write end of the new stage's input channel
    type Writer: Write;

    /// Handle to the new stage
    type Handle: StageHandle;

    /// Create a channel and start a stage reading from it
    fn launch(&self) -> Result<(Self::Writer, Self::Handle)>;
}
