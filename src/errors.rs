//! Error types for the PGO pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Creates the Error, ErrorKind, ResultExt, and Result types
error_chain!{
    errors {
        Provision(path: PathBuf) {
            description("failed to provision workload input")
            display("failed to provision workload input {}", path.display())
        }
        Launch(command: String) {
            description("failed to launch process")
            display("failed to launch {}", command)
        }
        Timeout(command: String, limit: Duration) {
            description("process exceeded its time limit")
            display("{} did not finish within {:?}", command, limit)
        }
        ProcessFailed(command: String, outcome: String) {
            description("process did not exit cleanly")
            display("{} finished with {}", command, outcome)
        }
        ArtifactNotFound(pattern: String) {
            description("no profile generated")
            display("no CPU profile generated (looked for {})", pattern)
        }
        Merge(program: String) {
            description("failed to merge profiles")
            display("failed to merge profiles for {}", program)
        }
        Build(program: String) {
            description("compiler invocation failed")
            display("failed to build {}", program)
        }
        EmptyProfile(path: PathBuf) {
            description("refusing to build with an empty profile")
            display("profile {} is empty", path.display())
        }
        UnknownProgram(name: String) {
            description("unknown program")
            display("unknown program: {}", name)
        }
        CaptureEndpoint(addr: SocketAddr) {
            description("error in profile capture request")
            display("capturing profile from {} failed", addr)
        }
        ServerNotServing(detail: String) {
            description("server never reached serving state")
            display("server never started serving: {}", detail)
        }
        Setting(msg: String) {
            description("invalid setting")
            display("invalid setting: {}", msg)
        }
    }

    foreign_links {
        Io(::std::io::Error);
        Timer(::tokio_timer::TimerError);
        Toml(::toml::de::Error);
        Csv(::csv::Error);
        Pattern(::glob::PatternError);
    }
}
