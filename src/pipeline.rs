//! Sequencing of the whole optimization run.
//!
//! Stages run in order: baseline build, capture and merge, optimized build,
//! comparison. Failures are recorded per program in the `RunReport` and the
//! program drops out of the later stages; only an optimized build failure
//! stops the remaining builds.

use capture::Session;
use compare::Comparator;
use compiler::Compiler;
use errors::*;
use merge::Merger;
use process::Runner;
use program::ProgramSpec;
use report::{RunReport, Stage};
use setting::Setting;
use std::fs;
use std::path::Path;
use workload::{Format, Provisioner, Size, WorkloadSet};

/// Joins an error and its causes into one line.
fn describe(e: &Error) -> String {
    e.iter()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

pub struct Pipeline<'a, C> {
    setting: &'a Setting,
    runner: &'a Runner,
    programs: Vec<ProgramSpec>,
    compiler: C,
}

impl<'a, C: Compiler> Pipeline<'a, C> {
    pub fn new(setting: &'a Setting, runner: &'a Runner, programs: Vec<ProgramSpec>, compiler: C) -> Self {
        Pipeline {
            setting: setting,
            runner: runner,
            programs: programs,
            compiler: compiler,
        }
    }

    /// Runs every stage and returns the per-program report.
    ///
    /// Only environment problems (directories that cannot be created) are
    /// returned as errors; everything program-specific ends up in the report.
    pub fn run(&self) -> Result<RunReport> {
        fs::create_dir_all(&self.setting.profile_dir)?;
        fs::create_dir_all(&self.setting.output_dir)?;
        let mut report = RunReport::new(self.programs.iter().map(|p| p.name.clone()));

        info!("building {} baseline binaries", self.programs.len());
        self.build_baselines(&mut report);

        info!("capturing profiles ({} iterations each)", self.setting.iterations);
        self.capture_all(&mut report);
        if self.setting.profile_only {
            info!("profiles are in {:?}", self.setting.profile_dir);
            return Ok(report);
        }

        info!("building optimized binaries");
        if !self.build_optimized(&mut report) {
            warn!("optimized build failed, not comparing");
            return Ok(report);
        }

        info!("comparing performance");
        self.compare_all(&mut report);
        Ok(report)
    }

    fn build_baselines(&self, report: &mut RunReport) {
        for program in &self.programs {
            let output = self.setting.baseline_binary(&program.name);
            let stage = match self.compiler.build(&output, &program.package, None) {
                Ok(()) => Stage::Ok,
                Err(e) => {
                    error!("{}: baseline build failed: {}", program.name, describe(&e));
                    Stage::Failed(e.to_string())
                }
            };
            if let Some(entry) = report.get_mut(&program.name) {
                entry.baseline = stage;
            }
        }
    }

    fn capture_all(&self, report: &mut RunReport) {
        let provisioner = Provisioner::new(self.setting.seed);
        let workloads = match provisioner.provision(&self.setting.profile_dir, self.setting.data_lines) {
            Ok(workloads) => workloads,
            Err(e) => {
                error!("provisioning failed: {}", describe(&e));
                for entry in &mut report.programs {
                    if entry.baseline.is_ok() {
                        entry.capture = Stage::Failed(e.to_string());
                    }
                }
                return;
            }
        };

        {
            let session = Session::new(self.setting, self.runner, &workloads);
            let merger = Merger::new(self.setting, self.runner);
            for program in &self.programs {
                let entry = match report.get_mut(&program.name) {
                    Some(entry) => entry,
                    None => continue,
                };
                if !entry.baseline.is_ok() {
                    continue;
                }
                let merged = session
                    .capture(program, self.setting.iterations)
                    .and_then(|artifacts| merger.merge(&program.name, artifacts));
                entry.capture = match merged {
                    Ok(ref profile) if profile.is_empty() => Stage::Skipped("empty profile".into()),
                    Ok(_) => Stage::Ok,
                    Err(e) => {
                        warn!("{}: no profile: {}", program.name, describe(&e));
                        Stage::Failed(e.to_string())
                    }
                };
            }
        }

        if !self.setting.profile_only {
            workloads.remove();
        }
    }

    /// Returns `false` if a build failed and the run must stop.
    fn build_optimized(&self, report: &mut RunReport) -> bool {
        for program in &self.programs {
            let entry = match report.get_mut(&program.name) {
                Some(entry) => entry,
                None => continue,
            };
            match entry.capture {
                Stage::Ok => {}
                Stage::Skipped(ref why) => {
                    warn!("{}: skipping PGO build ({})", program.name, why);
                    entry.optimized = Stage::Skipped(why.clone());
                    continue;
                }
                Stage::Failed(_) => {
                    entry.optimized = Stage::Skipped("no profile".into());
                    continue;
                }
                Stage::NotAttempted => continue,
            }

            let profile = self.setting.merged_profile(&program.name);
            // the profile could have been emptied since the merge
            let len = fs::metadata(&profile).map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                warn!("{}: skipping PGO build (profile {:?} is empty)", program.name, profile);
                entry.optimized = Stage::Skipped("empty profile".into());
                continue;
            }

            let output = self.setting.optimized_binary(&program.name);
            match self.compiler.build(&output, &program.package, Some(&profile)) {
                Ok(()) => entry.optimized = Stage::Ok,
                Err(e) => {
                    error!("{}: optimized build failed: {}", program.name, describe(&e));
                    entry.optimized = Stage::Failed(e.to_string());
                    return false;
                }
            }
        }
        true
    }

    fn compare_all(&self, report: &mut RunReport) {
        let dir = self.setting.profile_dir.join("bench");
        let workloads = match self.bench_workloads(&dir) {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!("no benchmark workload, not comparing: {}", describe(&e));
                return;
            }
        };

        {
            let comparator = Comparator::new(self.setting, self.runner, &workloads);
            for program in &self.programs {
                let entry = match report.get_mut(&program.name) {
                    Some(entry) => entry,
                    None => continue,
                };
                if !entry.optimized.is_ok() {
                    continue;
                }
                let baseline = self.setting.baseline_binary(&program.name);
                let optimized = self.setting.optimized_binary(&program.name);
                entry.comparison = match comparator.compare(program, &baseline, &optimized) {
                    Ok(comparison) => comparison,
                    Err(e) => {
                        warn!("{}: comparison failed: {}", program.name, describe(&e));
                        None
                    }
                };
            }
        }

        workloads.remove();
        if let Err(e) = fs::remove_dir(&dir) {
            debug!("not removing {:?}: {}", dir, e);
        }
    }

    fn bench_workloads(&self, dir: &Path) -> Result<WorkloadSet> {
        let lines = self.setting.timing.bench_log_lines;
        let workloads = WorkloadSet {
            log: dir.join("bench.log"),
            tabular: dir.join("bench.csv"),
            growing_log: dir.join("bench-growing.log"),
        };
        let provisioner = Provisioner::new(self.setting.seed);
        provisioner.generate(&workloads.log, Size::Lines(lines), Format::Log)?;
        provisioner.generate(&workloads.tabular, Size::Lines(lines / 10), Format::Csv)?;
        Ok(workloads)
    }
}
