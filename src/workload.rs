//! Synthetic workload inputs.
//!
//! The provisioner writes pseudo-random log and tabular files from a fixed
//! seed. Generation is idempotent: an existing file is never regenerated.

use chrono::{Duration as ChronoDuration, Utc};
use csv;
use errors::*;
use rand::{Rng, SeedableRng, XorShiftRng};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LEVELS: [&str; 4] = ["INFO", "DEBUG", "WARN", "ERROR"];
const USERS: [&str; 10] = [
    "user1", "user2", "user3", "user4", "user5", "admin", "guest", "service", "monitor", "test",
];
const ACTIONS: [&str; 10] = [
    "login", "logout", "query", "update", "delete", "create", "read", "write", "sync", "backup",
];

/// Logical name of a workload input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Log,
    Tabular,
    GrowingLog,
}

/// The inputs a capture session runs against, one field per input.
#[derive(Debug, Clone)]
pub struct WorkloadSet {
    pub log: PathBuf,
    pub tabular: PathBuf,
    pub growing_log: PathBuf,
}

impl WorkloadSet {
    pub fn path(&self, input: Input) -> &Path {
        match input {
            Input::Log => &self.log,
            Input::Tabular => &self.tabular,
            Input::GrowingLog => &self.growing_log,
        }
    }

    /// Removes every input file. Missing files are ignored.
    pub fn remove(&self) {
        for path in &[&self.log, &self.tabular, &self.growing_log] {
            if let Err(e) = fs::remove_file(path) {
                trace!("not removing {:?}: {}", path, e);
            }
        }
    }
}

/// Output format of a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Log,
    Csv,
}

/// Target size of a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Lines(usize),
    Bytes(u64),
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Format> {
        match s {
            "log" => Ok(Format::Log),
            "csv" => Ok(Format::Csv),
            _ => bail!(ErrorKind::Setting(format!("unsupported format: {}", s))),
        }
    }
}

impl FromStr for Size {
    type Err = Error;

    /// Parses `10MB`, `5K`, `1.5GB` or a plain byte count.
    fn from_str(s: &str) -> Result<Size> {
        let s = s.trim().to_uppercase();
        let s = s.trim_end_matches('B');
        let (num, mult) = match s.chars().last() {
            Some('K') => (&s[..s.len() - 1], 1u64 << 10),
            Some('M') => (&s[..s.len() - 1], 1 << 20),
            Some('G') => (&s[..s.len() - 1], 1 << 30),
            Some('T') => (&s[..s.len() - 1], 1 << 40),
            _ => (s, 1),
        };
        let num: f64 = num.trim()
            .parse()
            .map_err(|_| ErrorKind::Setting(format!("invalid size: {}", s)))?;
        if !num.is_finite() || num < 0.0 {
            bail!(ErrorKind::Setting(format!("invalid size: {}", s)));
        }
        let bytes = num * mult as f64;
        if bytes >= u64::max_value() as f64 {
            bail!(ErrorKind::Setting(format!("size too large: {}", s)));
        }
        Ok(Size::Bytes(bytes as u64))
    }
}

#[derive(Serialize)]
struct Row<'a> {
    timestamp: String,
    user: &'a str,
    action: &'a str,
    duration: u32,
    status: &'a str,
}

/// Produces named workload inputs.
pub struct Provisioner {
    seed: u32,
}

impl Provisioner {
    pub fn new(seed: u32) -> Self {
        Provisioner { seed: seed }
    }

    fn rng(&self) -> XorShiftRng {
        // an all-zero seed is rejected by xorshift
        XorShiftRng::from_seed([self.seed | 1, 0x193a_6754, 0xa8a7_d469, 0x9783_0e05])
    }

    /// Generates `path` unless it already exists.
    pub fn generate(&self, path: &Path, size: Size, format: Format) -> Result<()> {
        if path.exists() {
            debug!("{:?} exists, leaving it untouched", path);
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).chain_err(|| ErrorKind::Provision(path.to_path_buf()))?;
        }
        let result = match format {
            Format::Log => self.write_log(path, size),
            Format::Csv => self.write_csv(path, size),
        };
        result.chain_err(|| ErrorKind::Provision(path.to_path_buf()))
    }

    /// Provisions the full input set for a capture run inside `dir`.
    pub fn provision(&self, dir: &Path, lines: usize) -> Result<WorkloadSet> {
        let set = WorkloadSet {
            log: dir.join("test.log"),
            tabular: dir.join("test.csv"),
            growing_log: dir.join("growing.log"),
        };
        self.generate(&set.log, Size::Lines(lines), Format::Log)?;
        self.generate(&set.tabular, Size::Lines(lines / 10), Format::Csv)?;
        info!("provisioned workloads in {:?}", dir);
        Ok(set)
    }

    fn write_log(&self, path: &Path, size: Size) -> Result<()> {
        let mut rng = self.rng();
        let mut out = BufWriter::new(File::create(path)?);
        let now = Utc::now();
        let mut lines = 0usize;
        let mut bytes = 0u64;
        while !reached(size, lines, bytes) {
            lines += 1;
            let ts = now - ChronoDuration::seconds(lines as i64);
            let line = format!(
                "[{}] {} - User {} performed {} action (duration: {}ms, status: {})\n",
                ts.format("%Y-%m-%d %H:%M:%S"),
                pick(&mut rng, &LEVELS),
                pick(&mut rng, &USERS),
                pick(&mut rng, &ACTIONS),
                rng.gen_range(100, 5100),
                status(&mut rng)
            );
            out.write_all(line.as_bytes())?;
            bytes += line.len() as u64;
        }
        out.flush()?;
        Ok(())
    }

    fn write_csv(&self, path: &Path, size: Size) -> Result<()> {
        let mut rng = self.rng();
        let mut wtr = csv::Writer::from_path(path)?;
        let now = Utc::now();
        let mut lines = 0usize;
        while !reached(size, lines, wtr.get_ref().metadata()?.len()) {
            lines += 1;
            let ts = now - ChronoDuration::seconds(lines as i64);
            wtr.serialize(Row {
                timestamp: ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                user: pick(&mut rng, &USERS),
                action: pick(&mut rng, &ACTIONS),
                duration: rng.gen_range(100, 5100),
                status: status(&mut rng),
            })?;
            if let Size::Bytes(_) = size {
                wtr.flush()?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

fn reached(size: Size, lines: usize, bytes: u64) -> bool {
    match size {
        Size::Lines(n) => lines >= n,
        Size::Bytes(n) => bytes >= n,
    }
}

fn pick<'a, R: Rng>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items[rng.gen_range(0, items.len())]
}

fn status<R: Rng>(rng: &mut R) -> &'static str {
    if rng.gen::<f32>() < 0.1 {
        "failure"
    } else {
        "success"
    }
}
