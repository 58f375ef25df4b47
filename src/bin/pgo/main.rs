//! Runs the profile-guided optimization pipeline.
extern crate chrono;
extern crate env_logger;
#[macro_use]
extern crate log;
extern crate pgo_pipeline;
#[macro_use]
extern crate structopt;

use pgo_pipeline::*;
use std::env;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "pgo")]
#[structopt(about = "Build, profile and rebuild programs with profile-guided optimization")]
struct Opt {
    /// TOML setting file; built-in defaults apply when absent.
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    #[structopt(help = "Path to the setting file")]
    config: Option<PathBuf>,

    #[structopt(long = "profiledir", parse(from_os_str))]
    #[structopt(help = "Directory for profiles and workload data")]
    profile_dir: Option<PathBuf>,

    #[structopt(long = "outdir", parse(from_os_str))]
    #[structopt(help = "Directory for baseline and optimized binaries")]
    output_dir: Option<PathBuf>,

    #[structopt(long = "datasize")]
    #[structopt(help = "Lines of log data generated for profiling")]
    data_lines: Option<usize>,

    #[structopt(long = "iterations")]
    #[structopt(help = "Capture iterations per program")]
    iterations: Option<usize>,

    #[structopt(short = "v", long = "verbose")]
    #[structopt(help = "Show child process output and debug logs")]
    verbose: bool,

    #[structopt(long = "profileonly")]
    #[structopt(help = "Stop after generating profiles")]
    profile_only: bool,

    #[structopt(long = "report", parse(from_os_str))]
    #[structopt(help = "Also write the run report as CSV")]
    report: Option<PathBuf>,

    /// Programs to optimize, the whole catalog when empty.
    #[structopt(help = "Programs to optimize")]
    programs: Vec<String>,
}

fn init_logger(verbose: bool) {
    let format = |record: &log::LogRecord| {
        let t = chrono::Utc::now();
        format!(
            "{} {:<5} {}",
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            record.level(),
            record.args()
        )
    };

    let mut builder = env_logger::LogBuilder::new();
    builder.format(format);
    builder.filter(
        None,
        if verbose {
            log::LogLevelFilter::Debug
        } else {
            log::LogLevelFilter::Info
        },
    );
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse(&spec);
    }

    if let Err(e) = builder.init() {
        eprintln!("failed to initialize logging: {}", e);
    }
}

fn setting(opt: &Opt) -> Result<Setting> {
    let mut setting = match opt.config {
        Some(ref path) => Setting::init(path)?,
        None => Setting::default(),
    };
    if let Some(ref dir) = opt.profile_dir {
        setting.profile_dir = dir.clone();
    }
    if let Some(ref dir) = opt.output_dir {
        setting.output_dir = dir.clone();
    }
    if let Some(lines) = opt.data_lines {
        setting.data_lines = lines;
    }
    if let Some(n) = opt.iterations {
        setting.iterations = n;
    }
    if !opt.programs.is_empty() {
        setting.programs = opt.programs.clone();
    }
    setting.verbose |= opt.verbose;
    setting.profile_only |= opt.profile_only;
    setting.validate()?;
    Ok(setting)
}

fn run(opt: &Opt) -> Result<bool> {
    let setting = setting(opt)?;
    let programs = ProgramSpec::resolve(&setting.programs)?;
    debug!("{:?}", setting);

    let runner = Runner::new(setting.verbose);
    let compiler = Toolchain::new(&setting, &runner);
    let report = Pipeline::new(&setting, &runner, programs, compiler).run()?;

    println!("{}", report.render());
    if let Some(ref path) = opt.report {
        report.write_csv(path)?;
        info!("report written to {:?}", path);
    }
    Ok(report.success())
}

pub fn main() {
    let opt = Opt::from_args();
    init_logger(opt.verbose);

    match run(&opt) {
        Ok(true) => {}
        Ok(false) => {
            error!("a build stage failed");
            process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            for cause in e.iter().skip(1) {
                error!("caused by: {}", cause);
            }
            process::exit(1);
        }
    }
}
