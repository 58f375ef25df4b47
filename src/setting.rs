//! A flexible pipeline setting in TOML.

use errors::*;
use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml;

/// The pipeline setting. Every field has a default so that a partial (or
/// absent) file is valid.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Setting {
    /// Root of the source tree the compiler runs in.
    pub source_dir: PathBuf,

    /// Where merged profiles, iteration artifacts and workloads live.
    pub profile_dir: PathBuf,

    /// Where baseline and optimized binaries are written.
    pub output_dir: PathBuf,

    /// Lines of log data generated for profiling.
    pub data_lines: usize,

    /// Capture iterations per program.
    pub iterations: usize,

    /// Seed for the workload generator.
    pub seed: u32,

    /// Inherit child process output instead of discarding it.
    pub verbose: bool,

    /// Stop after the capture stage.
    pub profile_only: bool,

    /// Programs to optimize. Empty means the whole catalog.
    pub programs: Vec<String>,

    /// External tool invocations.
    pub toolchain: Toolchain,

    /// Delays, windows and timeouts.
    pub timing: Timing,

    /// Fixed endpoints for the server program.
    pub server: Endpoints,
}

/// How the compiler and the profile merging tool are invoked.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Toolchain {
    /// Build command, e.g. `["go", "build"]`.
    pub build: Vec<String>,

    /// Flag that precedes the profile path for optimized builds.
    pub profile_flag: String,

    /// Flag that precedes the output path.
    pub output_flag: String,

    /// Prefix joined with a program's package name.
    pub package_prefix: String,

    /// Merge command; input profiles are appended, the result is read from
    /// stdout.
    pub merge: Vec<String>,
}

/// All time-related knobs, in the units named by each field.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Timing {
    pub iteration_timeout_secs: u64,
    pub settle_ms: u64,
    pub capture_window_secs: u64,
    pub capture_offset_ms: u64,
    pub grace_ms: u64,
    pub client_repeat: usize,
    pub shutdown_after_secs: u64,
    pub writer_lines: usize,
    pub writer_interval_ms: u64,
    pub bench_log_lines: usize,
}

/// Network endpoints the server program binds during capture.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Endpoints {
    /// Primary service address, kept apart from production defaults.
    pub listen: String,

    /// Administrative profiling address.
    pub pprof: String,
}

impl Default for Setting {
    fn default() -> Self {
        Setting {
            source_dir: PathBuf::from("."),
            profile_dir: PathBuf::from("pgo-profiles"),
            output_dir: PathBuf::from("pgo-build"),
            data_lines: 1_000_000,
            iterations: 3,
            seed: 0x5eed,
            verbose: false,
            profile_only: false,
            programs: Vec::new(),
            toolchain: Toolchain::default(),
            timing: Timing::default(),
            server: Endpoints::default(),
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain {
            build: vec!["go".into(), "build".into()],
            profile_flag: "-pgo".into(),
            output_flag: "-o".into(),
            package_prefix: "./cmd/".into(),
            merge: vec!["go".into(), "tool".into(), "pprof".into(), "-proto".into()],
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            iteration_timeout_secs: 120,
            settle_ms: 2000,
            capture_window_secs: 5,
            capture_offset_ms: 500,
            grace_ms: 500,
            client_repeat: 2,
            shutdown_after_secs: 3,
            writer_lines: 200,
            writer_interval_ms: 20,
            bench_log_lines: 10_000,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            listen: "localhost:12222".into(),
            pprof: "localhost:16060".into(),
        }
    }
}

impl Setting {
    /// Initialize from a file.
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Setting> {
        let mut file = File::open(path.as_ref())
            .chain_err(|| format!("no setting file {:?}", path.as_ref()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Setting::parse(&contents)
    }

    /// Parses a TOML document.
    pub fn parse(contents: &str) -> Result<Setting> {
        let setting: Setting = toml::from_str(contents)?;
        setting.validate()?;
        Ok(setting)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            bail!(ErrorKind::Setting("iterations must be at least 1".into()));
        }
        if self.toolchain.build.is_empty() {
            bail!(ErrorKind::Setting("toolchain.build is empty".into()));
        }
        if self.toolchain.merge.is_empty() {
            bail!(ErrorKind::Setting("toolchain.merge is empty".into()));
        }
        // a follow program must stop while the log is still growing
        let timing = &self.timing;
        if timing.shutdown_after() >= timing.writer_span() {
            bail!(ErrorKind::Setting(format!(
                "timing.shutdown_after_secs ({}s) must be shorter than the log writer's run ({:?})",
                timing.shutdown_after_secs,
                timing.writer_span()
            )));
        }
        Ok(())
    }

    /// Path of the baseline binary for `program`.
    pub fn baseline_binary(&self, program: &str) -> PathBuf {
        self.output_dir.join(format!("{}-baseline", program))
    }

    /// Path of the optimized binary for `program`.
    pub fn optimized_binary(&self, program: &str) -> PathBuf {
        self.output_dir.join(program)
    }

    /// Canonical merged profile path for `program`.
    pub fn merged_profile(&self, program: &str) -> PathBuf {
        self.profile_dir.join(format!("{}.pprof", program))
    }

    /// Resolves the administrative profiling endpoint, preferring IPv4 since
    /// that is where `localhost` listeners usually end up.
    pub fn pprof_addr(&self) -> Result<SocketAddr> {
        let addrs = self.server
            .pprof
            .to_socket_addrs()
            .chain_err(|| ErrorKind::Setting(format!("bad pprof address {}", self.server.pprof)))?
            .collect::<Vec<_>>();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .cloned()
            .ok_or_else(|| ErrorKind::Setting(format!("{} did not resolve", self.server.pprof)).into())
    }

    /// Port part of the service address.
    pub fn listen_port(&self) -> Result<u16> {
        self.server
            .listen
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| ErrorKind::Setting(format!("no port in {}", self.server.listen)).into())
    }
}

impl Timing {
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_secs(self.capture_window_secs)
    }

    pub fn capture_offset(&self) -> Duration {
        Duration::from_millis(self.capture_offset_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn writer_interval(&self) -> Duration {
        Duration::from_millis(self.writer_interval_ms)
    }

    pub fn shutdown_after(&self) -> Duration {
        Duration::from_secs(self.shutdown_after_secs)
    }

    /// How long the follow writer keeps appending.
    pub fn writer_span(&self) -> Duration {
        Duration::from_millis(
            self.writer_interval_ms
                .saturating_mul(self.writer_lines as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let setting = Setting::parse(
            r#"
            iterations = 5
            programs = ["dcat", "dgrep"]

            [timing]
            settle_ms = 100
            "#,
        ).unwrap();
        assert_eq!(setting.iterations, 5);
        assert_eq!(setting.programs, vec!["dcat", "dgrep"]);
        assert_eq!(setting.timing.settle(), Duration::from_millis(100));
        assert_eq!(setting.timing.capture_window_secs, 5);
        assert_eq!(setting.toolchain.profile_flag, "-pgo");
        assert_eq!(setting.profile_dir, PathBuf::from("pgo-profiles"));
    }

    #[test]
    fn shipped_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("Setting.toml");
        let setting = Setting::init(&path).unwrap();
        let default = Setting::default();
        assert_eq!(setting.seed, default.seed);
        assert_eq!(setting.data_lines, default.data_lines);
        assert_eq!(setting.toolchain.merge, default.toolchain.merge);
        assert_eq!(setting.timing.bench_log_lines, default.timing.bench_log_lines);
        assert_eq!(setting.server.pprof, default.server.pprof);
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(Setting::parse("iterations = 0").is_err());
    }

    #[test]
    fn follow_program_stops_before_the_writer() {
        let err = Setting::parse(
            r#"
            [timing]
            shutdown_after_secs = 4
            writer_lines = 200
            writer_interval_ms = 20
            "#,
        ).unwrap_err();
        match *err.kind() {
            ErrorKind::Setting(ref why) => assert!(why.contains("shutdown_after_secs")),
            ref other => panic!("unexpected error {:?}", other),
        }

        let setting = Setting::parse("[timing]\nshutdown_after_secs = 1\nwriter_lines = 100").unwrap();
        assert_eq!(setting.timing.writer_span(), Duration::from_secs(2));
        assert!(Setting::default().validate().is_ok());
    }

    #[test]
    fn derived_paths() {
        let setting = Setting::default();
        assert_eq!(
            setting.baseline_binary("dcat"),
            PathBuf::from("pgo-build/dcat-baseline")
        );
        assert_eq!(setting.optimized_binary("dcat"), PathBuf::from("pgo-build/dcat"));
        assert_eq!(
            setting.merged_profile("dcat"),
            PathBuf::from("pgo-profiles/dcat.pprof")
        );
        assert_eq!(setting.listen_port().unwrap(), 12222);
    }

    #[test]
    fn pprof_address_resolves() {
        let mut setting = Setting::default();
        setting.server.pprof = "127.0.0.1:16060".into();
        let addr = setting.pprof_addr().unwrap();
        assert_eq!(addr.port(), 16060);
        assert!(addr.is_ipv4());
    }
}
