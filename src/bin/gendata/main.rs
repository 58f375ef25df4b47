//! Generates synthetic log or CSV workload files.
extern crate chrono;
extern crate env_logger;
extern crate log;
extern crate pgo_pipeline;
#[macro_use]
extern crate structopt;

use pgo_pipeline::{Format, Provisioner, Result, Size};
use std::env;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "gendata")]
#[structopt(about = "Generate test data for profiling")]
struct Opt {
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    #[structopt(help = "Output file path")]
    output: PathBuf,

    /// Accepts suffixes such as `10MB` or `5K`.
    #[structopt(short = "s", long = "size", default_value = "10MB")]
    #[structopt(help = "Target file size")]
    size: String,

    #[structopt(short = "l", long = "lines")]
    #[structopt(help = "Number of lines, overrides --size")]
    lines: Option<usize>,

    #[structopt(short = "f", long = "format", default_value = "log")]
    #[structopt(help = "Output format: log or csv")]
    format: String,

    #[structopt(long = "seed", default_value = "24301")]
    #[structopt(help = "Seed for the generator")]
    seed: u32,
}

fn run(opt: &Opt) -> Result<()> {
    let size = match opt.lines {
        Some(n) => Size::Lines(n),
        None => opt.size.parse()?,
    };
    let format: Format = opt.format.parse()?;
    Provisioner::new(opt.seed).generate(&opt.output, size, format)
}

pub fn main() {
    let format = |record: &log::LogRecord| {
        let t = chrono::Utc::now();
        format!(
            "{} {}",
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            record.args()
        )
    };

    let mut builder = env_logger::LogBuilder::new();
    builder.format(format);
    builder.filter(None, log::LogLevelFilter::Info);
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse(&spec);
    }
    if let Err(e) = builder.init() {
        eprintln!("failed to initialize logging: {}", e);
    }

    let opt = Opt::from_args();
    if let Err(e) = run(&opt) {
        eprintln!("error: {}", e);
        for cause in e.iter().skip(1) {
            eprintln!("caused by: {}", cause);
        }
        ::std::process::exit(1);
    }
    println!("Generated {}", opt.output.display());
}
