//! Process-per-stage backend
//!
//! Every stage is a fresh instance of the current executable started in
//! stage mode (`<exe> stage --ceiling N`). Its stdin is the read end of a new
//! pipe, stdout and stderr are inherited so all stages share the record.
//!
//! Descriptors created by `std::process` are close-on-exec, so a stage
//! inherits exactly one channel end (its stdin) and never a stray write end
//! that would keep some other channel from reaching end-of-stream.

use super::{StageHandle, StageLauncher};
use crate::error::{Result, SieveError};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

/// Subcommand that runs a single stage on stdin
pub const STAGE_SUBCOMMAND: &str = "stage";

/// Flag carrying the ceiling to a stage
pub const CEILING_FLAG: &str = "--ceiling";

/// Launches stages as child processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    ceiling: Option<i32>,
}

impl ProcessLauncher {
    /// Launch stages by running `program` in stage mode
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ceiling: None,
        }
    }

    /// Launch stages from the running executable
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            SieveError::Spawn(format!("Could not locate current executable: {}", e))
        })?;
        Ok(Self::new(program))
    }

    /// Pass a ceiling to every launched stage
    pub fn with_ceiling(mut self, ceiling: impl Into<Option<i32>>) -> Self {
        self.ceiling = ceiling.into();
        self
    }

    pub fn ceiling(&self) -> Option<i32> {
        self.ceiling
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(STAGE_SUBCOMMAND);
        if let Some(ceiling) = self.ceiling {
            cmd.arg(CEILING_FLAG).arg(ceiling.to_string());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl StageLauncher for ProcessLauncher {
    type Writer = ChildStdin;
    type Handle = ProcessHandle;

    fn launch(&self) -> Result<(ChildStdin, ProcessHandle)> {
        let mut child = self.command().spawn().map_err(|e| {
            SieveError::Spawn(format!("{}: {}", self.program.display(), e))
        })?;

        let Some(stdin) = child.stdin.take() else {
            // Cannot happen with Stdio::piped, but never leave the child behind
            let _ = child.kill();
            let _ = child.wait();
            return Err(SieveError::Spawn("stage stdin was not captured".to_string()));
        };

        tracing::debug!("Launched stage pid {}", child.id());
        Ok((stdin, ProcessHandle::new(child)))
    }
}

/// Handle to a stage process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        Self {
            child,
            status: None,
        }
    }

    /// Exit status, once reaped
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }
}

impl StageHandle for ProcessHandle {
    fn label(&self) -> String {
        format!("pid {}", self.child.id())
    }

    fn reap(&mut self) -> Result<()> {
        let status = self.child.wait().map_err(|e| SieveError::Reap {
            stage: self.label(),
            message: e.to_string(),
        })?;
        self.status = Some(status);

        if status.success() {
            Ok(())
        } else {
            Err(SieveError::StageFailed {
                stage: self.label(),
                status: status.to_string(),
            })
        }
    }
}
