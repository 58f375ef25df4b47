//! Starting, timing out, interrupting and reaping one external process.
//!
//! Completion is raced against a deadline with two wake-up sources: an
//! [`Exit`] future that re-checks the child on timer ticks, and a timer sleep.
//! Whichever resolves first decides the outcome. A process that runs out of
//! time is killed and then always reaped.

use errors::*;
use futures::{Async, Future, Poll, Stream};
use futures::future::Either;
use libc;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio_timer::{self, Timer};

/// Resolution of the timer wheel shared by a `Runner`.
const TICK_MS: u64 = 10;

/// Period at which a running child is re-checked for exit. Must span
/// several ticks: the wheel treats a sleep due within one tick as expired.
const EXIT_POLL_MS: u64 = 5 * TICK_MS;

/// A fully specified command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Invocation {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, val: V) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.dir {
            cmd.current_dir(dir);
        }
        for &(ref key, ref val) in &self.env {
            cmd.env(key, val);
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// The terminal state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Natural exit with a status code.
    Exited(i32),

    /// Terminated by SIGINT. Benign: the caller chose to stop the process.
    Interrupted,

    /// Terminated by any other signal.
    Signaled(i32),

    /// Ran past its deadline and was killed.
    TimedOut,

    /// Killed on request.
    Killed,
}

impl Outcome {
    /// A clean exit or a benign interrupt.
    pub fn is_success(&self) -> bool {
        match *self {
            Outcome::Exited(0) | Outcome::Interrupted => true,
            _ => false,
        }
    }

    fn from_status(status: ExitStatus) -> Outcome {
        if let Some(code) = status.code() {
            return Outcome::Exited(code);
        }
        match status.signal() {
            Some(libc::SIGINT) => Outcome::Interrupted,
            Some(sig) => Outcome::Signaled(sig),
            None => Outcome::Exited(-1),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Outcome::Exited(code) => write!(f, "exit status {}", code),
            Outcome::Interrupted => write!(f, "interrupt"),
            Outcome::Signaled(sig) => write!(f, "signal {}", sig),
            Outcome::TimedOut => write!(f, "timeout"),
            Outcome::Killed => write!(f, "kill"),
        }
    }
}

/// Result of a process run to completion.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Resolves when the child exits, checking on every timer tick.
struct Exit<'a> {
    child: &'a mut Child,
    ticks: tokio_timer::Interval,
}

impl<'a> Exit<'a> {
    fn new(child: &'a mut Child, timer: &Timer) -> Self {
        Exit {
            child: child,
            ticks: timer.interval(Duration::from_millis(EXIT_POLL_MS)),
        }
    }
}

impl<'a> Future for Exit<'a> {
    type Item = ExitStatus;
    type Error = Error;

    fn poll(&mut self) -> Poll<ExitStatus, Error> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Async::Ready(status));
            }
            match try_ready!(self.ticks.poll()) {
                Some(()) => continue,
                None => bail!("exit ticker ended"),
            }
        }
    }
}

/// Exclusive ownership of one running process.
///
/// Reaches exactly one terminal `Outcome`. Dropping a handle whose process
/// is still running kills and reaps it.
pub struct ProcessHandle {
    child: Child,
    label: String,
    timer: Timer,
    started: Instant,
    outcome: Option<Outcome>,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The recorded terminal outcome, if any.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Checks without blocking whether the process has finished.
    pub fn try_outcome(&mut self) -> Result<Option<Outcome>> {
        if self.outcome.is_some() {
            return Ok(self.outcome);
        }
        if let Some(status) = self.child.try_wait()? {
            self.outcome = Some(Outcome::from_status(status));
        }
        Ok(self.outcome)
    }

    /// Waits for the process, killing it if `limit` elapses first.
    pub fn wait(&mut self, limit: Option<Duration>) -> Result<Outcome> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let limit = match limit {
            Some(limit) => limit,
            None => {
                let status = Exit::new(&mut self.child, &self.timer).wait()?;
                return Ok(self.record(status));
            }
        };

        let raced = {
            let exit = Exit::new(&mut self.child, &self.timer);
            match exit.select2(self.timer.sleep(limit)).wait() {
                Ok(Either::A((status, _))) => Ok(Some(status)),
                Ok(Either::B(_)) => Ok(None),
                Err(Either::A((e, _))) => Err(e),
                Err(Either::B((e, _))) => Err(Error::from(e)),
            }
        };

        match raced? {
            Some(status) => Ok(self.record(status)),
            None => {
                warn!("{} exceeded {:?}, killing it", self.label, limit);
                self.force_kill()?;
                self.outcome = Some(Outcome::TimedOut);
                Ok(Outcome::TimedOut)
            }
        }
    }

    /// Asks the process to stop with SIGINT. No-op once it has finished.
    pub fn interrupt(&mut self) -> Result<()> {
        if self.try_outcome()?.is_some() {
            return Ok(());
        }
        debug!("interrupting {}", self.label);
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Force-kills and reaps the process. A process that already exited
    /// keeps its natural outcome.
    pub fn kill(&mut self) -> Result<Outcome> {
        if let Some(outcome) = self.try_outcome()? {
            return Ok(outcome);
        }
        self.force_kill()?;
        self.outcome = Some(Outcome::Killed);
        Ok(Outcome::Killed)
    }

    fn record(&mut self, status: ExitStatus) -> Outcome {
        let outcome = Outcome::from_status(status);
        trace!("{} finished with {}", self.label, outcome);
        self.outcome = Some(outcome);
        outcome
    }

    fn force_kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // already reaped
            Err(ref e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            if let Err(e) = self.kill() {
                warn!("failed to reap {}: {}", self.label, e);
            }
        }
    }
}

/// Starts processes and routes their standard streams.
///
/// Output is either inherited (verbose) or discarded, never buffered.
#[derive(Clone)]
pub struct Runner {
    verbose: bool,
    timer: Timer,
}

impl Runner {
    pub fn new(verbose: bool) -> Self {
        let timer = tokio_timer::wheel()
            .tick_duration(Duration::from_millis(TICK_MS))
            .num_slots(65_536)
            .build();
        Runner {
            verbose: verbose,
            timer: timer,
        }
    }

    /// The timer shared by everything this runner drives.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// A runner sharing this timer that always discards child output.
    pub fn quiet(&self) -> Runner {
        Runner {
            verbose: false,
            timer: self.timer.clone(),
        }
    }

    fn sink(&self) -> Stdio {
        if self.verbose {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Starts `inv` without waiting for it.
    pub fn spawn(&self, inv: &Invocation) -> Result<ProcessHandle> {
        self.spawn_with_stdout(inv, self.sink())
    }

    /// Starts `inv` with stdout sent to `stdout`.
    pub fn spawn_with_stdout(&self, inv: &Invocation, stdout: Stdio) -> Result<ProcessHandle> {
        let label = inv.to_string();
        debug!("starting {}", label);
        let child = inv.command()
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(self.sink())
            .spawn()
            .chain_err(|| ErrorKind::Launch(label.clone()))?;
        Ok(ProcessHandle {
            child: child,
            label: label,
            timer: self.timer.clone(),
            started: Instant::now(),
            outcome: None,
        })
    }

    /// Runs `inv` to completion, bounded by `limit` when given.
    pub fn run(&self, inv: &Invocation, limit: Option<Duration>) -> Result<Completion> {
        let mut handle = self.spawn(inv)?;
        let outcome = handle.wait(limit)?;
        Ok(Completion {
            outcome: outcome,
            elapsed: handle.started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::thread;
    use tempfile::TempDir;

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn reports_exit_codes() {
        let runner = Runner::new(false);
        let ok = runner.run(&sh("exit 0"), None).unwrap();
        assert_eq!(ok.outcome, Outcome::Exited(0));
        assert!(ok.outcome.is_success());

        let failed = runner
            .run(&sh("exit 3"), Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(failed.outcome, Outcome::Exited(3));
        assert!(!failed.outcome.is_success());
    }

    #[test]
    fn timeout_kills_the_process() {
        let runner = Runner::new(false);
        let inv = Invocation::new("sleep").arg("5");
        let done = runner.run(&inv, Some(Duration::from_millis(200))).unwrap();
        assert_eq!(done.outcome, Outcome::TimedOut);
        assert!(done.elapsed < Duration::from_secs(3));
    }

    /// CPU time consumed by the calling thread.
    #[cfg(target_os = "linux")]
    fn thread_cpu() -> Duration {
        let mut usage: libc::rusage = unsafe { ::std::mem::zeroed() };
        assert_eq!(unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) }, 0);
        let micros = |t: libc::timeval| t.tv_sec as u64 * 1_000_000 + t.tv_usec as u64;
        Duration::from_micros(micros(usage.ru_utime) + micros(usage.ru_stime))
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn waiting_does_not_spin() {
        let runner = Runner::new(false);
        let before = thread_cpu();
        let done = runner.run(&Invocation::new("sleep").arg("1"), None).unwrap();
        let used = thread_cpu() - before;
        assert_eq!(done.outcome, Outcome::Exited(0));
        assert!(done.elapsed >= Duration::from_secs(1));
        assert!(used < Duration::from_millis(300), "used {:?} of CPU", used);
    }

    #[test]
    fn timeout_applies_while_process_keeps_running() {
        let runner = Runner::new(false);
        let mut handle = runner.spawn(&Invocation::new("sleep").arg("10")).unwrap();
        let start = Instant::now();
        assert_eq!(handle.wait(Some(Duration::from_millis(300))).unwrap(), Outcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));
        // reaped as part of the timeout
        assert!(handle.child.try_wait().unwrap().is_some());
    }

    #[test]
    fn interrupt_is_benign() {
        let runner = Runner::new(false);
        let mut handle = runner.spawn(&Invocation::new("sleep").arg("5")).unwrap();
        thread::sleep(Duration::from_millis(100));
        handle.interrupt().unwrap();
        let outcome = handle.wait(Some(Duration::from_secs(3))).unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
        assert!(outcome.is_success());
    }

    #[test]
    fn other_signals_are_not_benign() {
        let runner = Runner::new(false);
        let done = runner.run(&sh("kill -TERM $$"), None).unwrap();
        assert_eq!(done.outcome, Outcome::Signaled(libc::SIGTERM));
        assert!(!done.outcome.is_success());
    }

    #[test]
    fn kill_after_natural_exit_keeps_exit() {
        let runner = Runner::new(false);
        let mut handle = runner.spawn(&sh("exit 0")).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(handle.kill().unwrap(), Outcome::Exited(0));
        assert_eq!(handle.outcome(), Some(Outcome::Exited(0)));
    }

    #[test]
    fn kill_running_process() {
        let runner = Runner::new(false);
        let mut handle = runner.spawn(&Invocation::new("sleep").arg("5")).unwrap();
        assert_eq!(handle.kill().unwrap(), Outcome::Killed);
        // terminal state is sticky
        assert_eq!(handle.kill().unwrap(), Outcome::Killed);
        assert_eq!(handle.wait(None).unwrap(), Outcome::Killed);
    }

    #[test]
    fn drop_reaps_running_process() {
        let runner = Runner::new(false);
        let handle = runner.spawn(&Invocation::new("sleep").arg("30")).unwrap();
        let pid = handle.id() as libc::pid_t;
        drop(handle);
        let rc = unsafe { libc::kill(pid, 0) };
        assert_eq!(rc, -1);
    }

    #[test]
    fn launch_failure_is_an_error() {
        let runner = Runner::new(false);
        let err = runner
            .run(&Invocation::new("/nonexistent/binary"), None)
            .unwrap_err();
        match *err.kind() {
            ErrorKind::Launch(ref cmd) => assert!(cmd.contains("/nonexistent/binary")),
            ref other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn passes_dir_and_env() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("marker")).unwrap();
        let inv = sh(r#"test -f marker && test "$PGO_TEST" = yes"#)
            .current_dir(dir.path())
            .env("PGO_TEST", "yes");
        let runner = Runner::new(false);
        assert_eq!(runner.run(&inv, None).unwrap().outcome, Outcome::Exited(0));
    }

    #[test]
    fn invocation_display() {
        let inv = Invocation::new("bin/dcat").args(&["-cfg", "none"]);
        assert_eq!(inv.to_string(), "bin/dcat -cfg none");
        assert_eq!(inv.program(), Path::new("bin/dcat"));
    }
}
