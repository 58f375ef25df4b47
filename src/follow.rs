//! Synthetic growth for the file a follow program is watching.
//!
//! `LogGrowth` owns one pool task that appends a timestamped line per tick.
//! The task ends after its line budget, on `stop`, or when the `LogGrowth`
//! is dropped; in every case the owner joins it before moving on.

use chrono::Utc;
use errors::*;
use futures::{Future, Stream};
use futures::sync::oneshot::Sender;
use futures_cpupool::{CpuFuture, CpuPool};
use interval;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio_timer::Timer;

const LEVELS: [&str; 4] = ["INFO", "WARN", "ERROR", "DEBUG"];

/// A running log writer.
pub struct LogGrowth {
    stop: Option<Sender<()>>,
    task: Option<CpuFuture<usize, Error>>,
}

impl LogGrowth {
    /// Starts appending up to `lines` lines to `path`, one every `every`.
    pub fn start(
        pool: &CpuPool,
        timer: &Timer,
        path: &Path,
        lines: usize,
        every: Duration,
    ) -> Result<LogGrowth> {
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        let (stop, rx) = interval::stopper();
        let timer = timer.clone();

        let task = pool.spawn_fn(move || {
            interval::new(timer, every, rx)
                .take(lines as u64)
                .map_err(Error::from)
                .fold(0usize, move |n, _| {
                    let n = n + 1;
                    writeln!(
                        file,
                        "[{}] {} - Test log line number {} with some additional text to process",
                        Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        LEVELS[n % LEVELS.len()],
                        n
                    )?;
                    Ok::<_, Error>(n)
                })
                .wait()
        });

        debug!("log growth started on {:?}", path);
        Ok(LogGrowth {
            stop: Some(stop),
            task: Some(task),
        })
    }

    /// Stops the writer and waits for it. Returns the number of lines written.
    pub fn stop(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        if let Some(stop) = self.stop.take() {
            // the writer may already have finished its budget
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => {
                let written = task.wait()?;
                debug!("log growth stopped after {} lines", written);
                Ok(written)
            }
            None => Ok(0),
        }
    }
}

impl Drop for LogGrowth {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("log writer failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;
    use tokio_timer;

    fn fast_timer() -> Timer {
        tokio_timer::wheel()
            .tick_duration(Duration::from_millis(2))
            .build()
    }

    fn lines_in(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn writes_its_whole_budget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.log");
        let pool = CpuPool::new(1);
        let timer = fast_timer();
        let growth = LogGrowth::start(&pool, &timer, &path, 5, Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(500));
        assert_eq!(growth.stop().unwrap(), 5);

        let lines = lines_in(&path);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("WARN - Test log line number 1 "));
        assert!(lines[1].contains("ERROR - Test log line number 2 "));
        assert!(lines[3].contains("INFO - Test log line number 4 "));
    }

    #[test]
    fn stop_cancels_early() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.log");
        let pool = CpuPool::new(1);
        let timer = fast_timer();
        let growth =
            LogGrowth::start(&pool, &timer, &path, 10_000, Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(200));
        let written = growth.stop().unwrap();
        assert!(written > 0 && written < 10_000);
        assert_eq!(lines_in(&path).len(), written);
    }

    #[test]
    fn drop_joins_the_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.log");
        let pool = CpuPool::new(1);
        let timer = fast_timer();
        {
            let _growth =
                LogGrowth::start(&pool, &timer, &path, 10_000, Duration::from_millis(10)).unwrap();
            thread::sleep(Duration::from_millis(100));
        }
        let after_drop = lines_in(&path).len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(lines_in(&path).len(), after_drop);
    }
}
