//! Profiling a long-running server under synthetic client load.
//!
//! The server is started and given time to settle. A fan-out of client
//! invocations is then launched on a pool while, after a short offset, the
//! server's profiling endpoint is asked for a CPU profile over a fixed
//! window. Both halves are joined before the server is stopped, so no client
//! or fetch outlives the driver.

use errors::*;
use futures::Future;
use futures::future::join_all;
use futures_cpupool::CpuPool;
use pprof;
use process::{Invocation, Outcome, ProcessHandle, Runner};
use setting::Setting;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio_core::reactor::Core;

/// Lifecycle of a driven server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Starting,
    Serving,
    /// Clients are running and the profile fetch is outstanding.
    LoadInFlight,
    Draining,
    Stopped,
}

/// How one client invocation ended.
#[derive(Debug)]
pub struct ClientResult {
    pub label: String,
    pub outcome: Result<Outcome>,
}

impl ClientResult {
    pub fn succeeded(&self) -> bool {
        match self.outcome {
            Ok(ref o) => o.is_success(),
            Err(_) => false,
        }
    }
}

/// A set of client invocations, each repeated a fixed number of times.
pub struct ClientGroup {
    clients: Vec<Invocation>,
    repeat: usize,
    limit: Duration,
}

impl ClientGroup {
    pub fn new(clients: Vec<Invocation>, repeat: usize, limit: Duration) -> Self {
        ClientGroup {
            clients: clients,
            repeat: repeat,
            limit: limit,
        }
    }

    /// Total number of client runs.
    pub fn len(&self) -> usize {
        self.clients.len() * self.repeat
    }

    /// Starts every client run on `pool`. Runs begin immediately; the
    /// returned future resolves once all of them ended, successful or not.
    pub fn launch(
        &self,
        pool: &CpuPool,
        runner: &Runner,
    ) -> Box<Future<Item = Vec<ClientResult>, Error = Error>> {
        let limit = self.limit;
        let runs = self.clients
            .iter()
            .flat_map(|c| ::std::iter::repeat(c).take(self.repeat))
            .map(|inv| {
                let runner = runner.clone();
                let inv = inv.clone();
                let label = inv.to_string();
                pool.spawn_fn(move || runner.run(&inv, Some(limit)))
                    .then(move |res| {
                        Ok::<_, Error>(ClientResult {
                            label: label,
                            outcome: res.map(|done| done.outcome),
                        })
                    })
            })
            .collect::<Vec<_>>();
        Box::new(join_all(runs))
    }
}

/// Drives one server through a single capture.
pub struct LoadDriver<'a> {
    setting: &'a Setting,
    runner: &'a Runner,
    phase: Phase,
}

impl<'a> LoadDriver<'a> {
    pub fn new(setting: &'a Setting, runner: &'a Runner) -> Self {
        LoadDriver {
            setting: setting,
            runner: runner,
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("server phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Starts `server`, loads it with `clients` and writes the profile
    /// fetched from its endpoint to `artifact`.
    ///
    /// The server is always stopped before this returns; on failure it is
    /// killed outright.
    pub fn capture(
        &mut self,
        server: &Invocation,
        clients: Vec<Invocation>,
        artifact: &Path,
    ) -> Result<()> {
        let setting = self.setting;
        let timing = &setting.timing;
        let group = ClientGroup::new(clients, timing.client_repeat, timing.iteration_timeout());

        self.enter(Phase::Starting);
        let mut process = self.runner.spawn(server)?;
        let result = self.serve(&mut process, &group, artifact);
        match result {
            Ok(()) => {
                self.enter(Phase::Draining);
                self.drain(&mut process)?;
            }
            Err(_) => {
                let outcome = process.kill()?;
                debug!("server cleanup ended with {}", outcome);
            }
        }
        self.enter(Phase::Stopped);
        result
    }

    fn serve(
        &mut self,
        process: &mut ProcessHandle,
        group: &ClientGroup,
        artifact: &Path,
    ) -> Result<()> {
        let setting = self.setting;
        let timing = &setting.timing;
        let timer = self.runner.timer().clone();
        timer.sleep(timing.settle()).wait()?;
        if let Some(outcome) = process.try_outcome()? {
            bail!(ErrorKind::ServerNotServing(format!("exited early with {}", outcome)));
        }
        self.enter(Phase::Serving);

        let addr = setting.pprof_addr()?;
        let window = timing.capture_window();
        let mut core = Core::new()?;
        let handle = core.handle();
        let pool = CpuPool::new(::std::cmp::max(group.len(), 1));

        info!("loading server with {} client runs", group.len());
        self.enter(Phase::LoadInFlight);
        let load = group.launch(&pool, self.runner);
        let sink = artifact.to_path_buf();
        let capture = timer
            .sleep(timing.capture_offset())
            .map_err(Error::from)
            .and_then(move |_| {
                debug!("fetching {:?} profile from {}", window, addr);
                pprof::fetch(&handle, addr, window)
            })
            .and_then(move |body| persist(&sink, &body))
            .then(Ok::<_, Error>);

        let (clients, captured) = core.run(load.join(capture))?;
        let failed = clients.iter().filter(|c| !c.succeeded()).count();
        for c in clients.iter().filter(|c| !c.succeeded()) {
            debug!("client {} ended with {:?}", c.label, c.outcome);
        }
        if failed > 0 {
            warn!("{} of {} client runs failed", failed, clients.len());
        } else {
            info!("all {} client runs finished", clients.len());
        }
        captured
    }

    fn drain(&self, process: &mut ProcessHandle) -> Result<()> {
        if let Err(e) = process.interrupt() {
            warn!("failed to interrupt server: {}", e);
        }
        self.runner.timer().sleep(self.setting.timing.grace()).wait()?;
        let outcome = process.kill()?;
        debug!("server stopped with {}", outcome);
        Ok(())
    }
}

fn persist(path: &Path, body: &[u8]) -> Result<()> {
    let written = File::create(path).and_then(|mut f| f.write_all(body));
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e.into());
    }
    debug!("wrote {} profile bytes to {:?}", body.len(), path);
    Ok(())
}
