//! Wall-clock comparison of a baseline binary and its optimized build.

use errors::*;
use process::{Invocation, Outcome, Runner};
use program::{expand, ArgContext, ProgramSpec};
use setting::Setting;
use std::path::Path;
use std::time::Duration;
use workload::WorkloadSet;

/// Timings of one program's two builds on the same workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub baseline: Duration,
    pub optimized: Duration,
}

fn secs(d: Duration) -> f64 {
    d.as_secs() as f64 + f64::from(d.subsec_nanos()) / 1e9
}

impl Comparison {
    /// Fraction of the baseline time saved, negative for a regression.
    /// Undefined when either side took no measurable time.
    pub fn improvement(&self) -> Option<f64> {
        let (base, opt) = (secs(self.baseline), secs(self.optimized));
        if base == 0.0 || opt == 0.0 {
            return None;
        }
        Some((base - opt) / base)
    }

    pub fn baseline_secs(&self) -> f64 {
        secs(self.baseline)
    }

    pub fn optimized_secs(&self) -> f64 {
        secs(self.optimized)
    }
}

/// Times both builds of a program against a small benchmark workload.
pub struct Comparator<'a> {
    setting: &'a Setting,
    runner: Runner,
    workloads: &'a WorkloadSet,
}

impl<'a> Comparator<'a> {
    pub fn new(setting: &'a Setting, runner: &Runner, workloads: &'a WorkloadSet) -> Self {
        Comparator {
            setting: setting,
            runner: runner.quiet(),
            workloads: workloads,
        }
    }

    /// Runs each binary once with the program's benchmark arguments.
    ///
    /// Returns `None` for programs without a benchmark, when either binary
    /// is missing, or when the result would be meaningless.
    pub fn compare(
        &self,
        program: &ProgramSpec,
        baseline: &Path,
        optimized: &Path,
    ) -> Result<Option<Comparison>> {
        let template = match program.bench {
            Some(ref template) => template,
            None => return Ok(None),
        };
        if !baseline.exists() || !optimized.exists() {
            debug!("{}: missing binary, not comparing", program.name);
            return Ok(None);
        }
        let ctx = ArgContext::new(self.setting, self.workloads, None)?;
        let args = expand(template, &ctx)?;

        let comparison = Comparison {
            baseline: self.time(&Invocation::new(baseline).args(&args))?,
            optimized: self.time(&Invocation::new(optimized).args(&args))?,
        };
        match comparison.improvement() {
            Some(ratio) => {
                info!(
                    "{}: baseline {:.3}s, optimized {:.3}s ({:+.1}%)",
                    program.name,
                    comparison.baseline_secs(),
                    comparison.optimized_secs(),
                    ratio * 100.0
                );
                Ok(Some(comparison))
            }
            None => {
                debug!("{}: zero timing, no comparison", program.name);
                Ok(None)
            }
        }
    }

    fn time(&self, inv: &Invocation) -> Result<Duration> {
        let done = self.runner.run(inv, None)?;
        if done.outcome != Outcome::Exited(0) {
            warn!("{} finished with {}", inv, done.outcome);
        }
        Ok(done.elapsed)
    }
}
