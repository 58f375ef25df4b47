//! Runs baseline binaries under representative load and collects one CPU
//! profile per iteration.
//!
//! Every profiled run writes into its own scratch directory, which is removed
//! when the run is over, whatever the outcome. The generated profile is then
//! copied to a predictable per-iteration path under the profile directory.

use chrono::Utc;
use errors::*;
use follow::LogGrowth;
use futures_cpupool::CpuPool;
use glob::{glob, Pattern};
use process::{Invocation, Outcome, Runner};
use program::{expand, Arg, ArgContext, ClientSpec, ProgramSpec, Shape};
use server::LoadDriver;
use setting::Setting;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use workload::WorkloadSet;

/// One profile file produced by one capture iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationArtifact {
    pub program: String,
    pub iteration: usize,
    pub path: PathBuf,
}

impl IterationArtifact {
    fn new(setting: &Setting, program: &str, iteration: usize) -> Self {
        IterationArtifact {
            program: program.to_string(),
            iteration: iteration,
            path: setting
                .profile_dir
                .join(format!("{}.{}.pprof", program, iteration)),
        }
    }

    /// Size on disk, `0` if the file is gone.
    pub fn len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Deletes the file. Missing files are ignored.
    pub fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            trace!("not removing {:?}: {}", self.path, e);
        }
    }
}

/// A per-run profile output directory, removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path, program: &str, iteration: usize) -> Result<ScratchDir> {
        let now = Utc::now();
        let path = root.join(format!(
            "iter_{}_{}_{}{:09}",
            program,
            iteration,
            now.timestamp(),
            now.timestamp_subsec_nanos()
        ));
        fs::create_dir_all(&path)?;
        Ok(ScratchDir { path: path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!("failed to remove {:?}: {}", self.path, e);
        }
    }
}

/// Finds the profile a program wrote into `dir`.
fn find_profile(dir: &Path, program: &str) -> Result<PathBuf> {
    let pattern = format!(
        "{}/{}_cpu_*.prof",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(program)
    );
    let mut found = glob(&pattern)?.filter_map(|p| p.ok()).collect::<Vec<_>>();
    found.sort();
    if found.len() > 1 {
        debug!("{} profiles match {}, using the first", found.len(), pattern);
    }
    found
        .into_iter()
        .next()
        .ok_or_else(|| ErrorKind::ArtifactNotFound(pattern).into())
}

/// Drives capture iterations against one provisioned workload set.
pub struct Session<'a> {
    setting: &'a Setting,
    runner: &'a Runner,
    workloads: &'a WorkloadSet,
    pool: CpuPool,
}

impl<'a> Session<'a> {
    pub fn new(setting: &'a Setting, runner: &'a Runner, workloads: &'a WorkloadSet) -> Self {
        Session {
            setting: setting,
            runner: runner,
            workloads: workloads,
            pool: CpuPool::new(1),
        }
    }

    /// Runs `iterations` capture iterations of `program`'s baseline binary.
    ///
    /// Fails on the first iteration that fails; artifacts of the earlier
    /// iterations are removed in that case.
    pub fn capture(&self, program: &ProgramSpec, iterations: usize) -> Result<Vec<IterationArtifact>> {
        let baseline = self.setting.baseline_binary(&program.name);
        if !baseline.exists() {
            bail!(ErrorKind::Launch(format!(
                "{} (baseline binary missing)",
                baseline.display()
            )));
        }

        let mut artifacts = Vec::with_capacity(iterations);
        for i in 0..iterations {
            info!("{}: capture iteration {}/{}", program.name, i + 1, iterations);
            match self.iteration(program, &baseline, i) {
                Ok(artifact) => {
                    debug!("{}: {} bytes in {:?}", program.name, artifact.len(), artifact.path);
                    artifacts.push(artifact);
                }
                Err(e) => {
                    warn!("{}: iteration {} failed: {}", program.name, i + 1, e);
                    for artifact in &artifacts {
                        artifact.discard();
                    }
                    return Err(e);
                }
            }
        }
        Ok(artifacts)
    }

    fn iteration(&self, program: &ProgramSpec, baseline: &Path, i: usize) -> Result<IterationArtifact> {
        let artifact = IterationArtifact::new(self.setting, &program.name, i);
        let result = match program.shape {
            Shape::OneShot { ref args } => self.run_profiled(program, baseline, args, &artifact),
            Shape::Follow { ref args } => self.follow(program, baseline, args, &artifact),
            Shape::Server {
                ref args,
                ref clients,
            } => self.serve(baseline, args, clients, &artifact),
        };
        if result.is_err() {
            artifact.discard();
        }
        result.map(|()| artifact)
    }

    fn follow(
        &self,
        program: &ProgramSpec,
        baseline: &Path,
        template: &[Arg],
        artifact: &IterationArtifact,
    ) -> Result<()> {
        let timing = &self.setting.timing;
        let growing = &self.workloads.growing_log;
        File::create(growing).chain_err(|| ErrorKind::Provision(growing.clone()))?;

        let growth = LogGrowth::start(
            &self.pool,
            self.runner.timer(),
            growing,
            timing.writer_lines,
            timing.writer_interval(),
        )?;
        let result = self.run_profiled(program, baseline, template, artifact);
        match growth.stop() {
            Ok(lines) => debug!("{}: appended {} lines while following", program.name, lines),
            Err(e) => warn!("{}: log writer failed: {}", program.name, e),
        }
        result
    }

    fn serve(
        &self,
        baseline: &Path,
        template: &[Arg],
        clients: &[ClientSpec],
        artifact: &IterationArtifact,
    ) -> Result<()> {
        let ctx = ArgContext::new(self.setting, self.workloads, None)?;
        let server = Invocation::new(baseline).args(expand(template, &ctx)?);
        let clients = clients
            .iter()
            .map(|c| {
                let binary = self.setting.baseline_binary(&c.program);
                Ok::<_, Error>(Invocation::new(binary).args(expand(&c.args, &ctx)?))
            })
            .collect::<Result<Vec<_>>>()?;
        LoadDriver::new(self.setting, self.runner).capture(&server, clients, &artifact.path)
    }

    /// Runs the binary once with profiling into a scratch directory and
    /// copies the profile it wrote to `artifact`.
    fn run_profiled(
        &self,
        program: &ProgramSpec,
        baseline: &Path,
        template: &[Arg],
        artifact: &IterationArtifact,
    ) -> Result<()> {
        let scratch = ScratchDir::create(&self.setting.profile_dir, &program.name, artifact.iteration)?;
        let ctx = ArgContext::new(self.setting, self.workloads, Some(scratch.path()))?;
        let inv = Invocation::new(baseline).args(expand(template, &ctx)?);

        let limit = self.setting.timing.iteration_timeout();
        let done = self.runner.run(&inv, Some(limit))?;
        match done.outcome {
            Outcome::TimedOut => bail!(ErrorKind::Timeout(inv.to_string(), limit)),
            outcome if !outcome.is_success() => {
                bail!(ErrorKind::ProcessFailed(inv.to_string(), outcome.to_string()))
            }
            _ => {}
        }
        debug!("{} finished in {:?}", program.name, done.elapsed);

        let generated = find_profile(scratch.path(), &program.name)?;
        fs::copy(&generated, &artifact.path)?;
        Ok(())
    }
}
