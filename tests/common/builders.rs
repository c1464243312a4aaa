//! Builders for in-process pipeline runs

use pipe_sieve::backend::ResourceCounters;
use pipe_sieve::{Feeder, FeederReport, SharedRecord, SieveConfig, ThreadLauncher};

/// Outcome of a thread-backed run
pub struct ThreadRun {
    pub report: FeederReport,
    pub record: SharedRecord,
    pub counters: ResourceCounters,
}

impl ThreadRun {
    pub fn primes(&self) -> Vec<i32> {
        self.record.primes()
    }
}

/// Builder for thread-backed pipeline runs
pub struct PipelineBuilder {
    config: SieveConfig,
    ceiling: bool,
}

impl PipelineBuilder {
    pub fn new(bound: i32) -> Self {
        Self {
            config: SieveConfig::with_bound(bound),
            ceiling: true,
        }
    }

    pub fn low(mut self, low: i32) -> Self {
        self.config.low = low;
        self
    }

    /// Do not hand the bound to stages
    pub fn without_ceiling(mut self) -> Self {
        self.ceiling = false;
        self
    }

    pub fn run_threaded(self) -> ThreadRun {
        let record = SharedRecord::new();
        let mut launcher = ThreadLauncher::new(record.clone());
        if self.ceiling {
            launcher = launcher.with_ceiling(self.config.ceiling());
        }

        let report = Feeder::from_config(&self.config)
            .run(&launcher)
            .expect("thread pipeline failed");

        ThreadRun {
            report,
            record,
            counters: launcher.counters().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_builder() {
        let run = PipelineBuilder::new(12).run_threaded();
        assert_eq!(run.report.values_fed, 10);
        assert_eq!(run.primes(), vec![2, 3, 5, 7, 11]);
    }
}
