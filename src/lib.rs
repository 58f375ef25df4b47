//! Profile-guided optimization pipeline.
//!
//! Builds baseline binaries of a set of programs, runs them under
//! representative load with CPU profiling enabled, merges the per-iteration
//! profiles and rebuilds each program with its merged profile. Baseline and
//! optimized binaries are then timed against each other.
//!
//! A run is sequenced by [`Pipeline`](pipeline/struct.Pipeline.html); every
//! knob comes from an immutable [`Setting`](setting/struct.Setting.html).
#![recursion_limit = "1024"]

extern crate chrono;
extern crate csv;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate futures;
extern crate futures_cpupool;
extern crate glob;
extern crate hyper;
extern crate libc;
#[macro_use]
extern crate log;
#[macro_use]
extern crate prettytable;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate tokio_core;
extern crate tokio_timer;
extern crate toml;

#[cfg(test)]
extern crate tempfile;

pub mod errors;
mod interval;
pub mod setting;
pub mod workload;
pub mod program;
pub mod process;
pub mod follow;
pub mod pprof;
pub mod server;
pub mod capture;
pub mod merge;
pub mod compiler;
pub mod compare;
pub mod report;
pub mod pipeline;

pub use compiler::{Compiler, Toolchain};
pub use errors::{Error, ErrorKind, Result, ResultExt};
pub use pipeline::Pipeline;
pub use process::{Invocation, Outcome, Runner};
pub use program::ProgramSpec;
pub use report::{RunReport, Stage};
pub use setting::Setting;
pub use workload::{Format, Provisioner, Size};
