//! Feeder: seeds the first stage and waits for the whole pipeline.

use crate::backend::{StageHandle, StageLauncher};
use crate::channel::ValueWriter;
use crate::config::SieveConfig;
use crate::error::{Result, ResultExt};
use std::io::Write;
use std::ops::Range;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeederReport {
    /// Candidates written into the first stage
    pub values_fed: u64,
}

/// Writes a candidate range into the first stage of a pipeline
#[derive(Debug, Clone)]
pub struct Feeder {
    candidates: Range<i32>,
}

impl Feeder {
    pub fn new(candidates: Range<i32>) -> Self {
        Self { candidates }
    }

    pub fn from_config(config: &SieveConfig) -> Self {
        Self::new(config.candidates())
    }

    /// Launch the first stage, feed it every candidate, close the channel and
    /// reap the stage.
    ///
    /// The first stage only finishes after reaping its own child, so when
    /// this returns the whole pipeline has terminated.
    pub fn run<L: StageLauncher>(&self, launcher: &L) -> Result<FeederReport> {
        let (writer, mut stage) = launcher.launch().context("Spawning first stage")?;
        let label = stage.label();
        tracing::debug!(
            "Feeding [{}, {}) into stage {}",
            self.candidates.start,
            self.candidates.end,
            label
        );

        let values_fed = match self.feed(writer) {
            Ok(n) => n,
            Err(err) => {
                // The write end is already released; collect the stage anyway
                return Err(match stage.reap() {
                    Ok(()) => err,
                    Err(stage_err) if err.is_broken_pipe() => stage_err,
                    Err(stage_err) => {
                        tracing::warn!("First stage {} also failed: {}", label, stage_err);
                        err
                    }
                });
            }
        };

        stage
            .reap()
            .with_context(|| format!("First stage {}", label))?;

        Ok(FeederReport { values_fed })
    }

    fn feed<W: Write>(&self, writer: W) -> Result<u64> {
        let mut writer = ValueWriter::new(writer);
        for value in self.candidates.clone() {
            writer
                .send(value)
                .with_context(|| format!("Feeding {}", value))?;
        }
        writer.close().context("Closing feed channel")
    }
}
