//! Programs known to the pipeline and how each one is driven.
//!
//! A program is pure data: a name, the package the compiler builds, and a
//! `Shape` whose argument templates are expanded against an `ArgContext` at
//! run time. Adding a program means adding a catalog entry; nothing else in
//! the pipeline branches on program names.

use errors::*;
use setting::Setting;
use std::ffi::OsString;
use std::path::Path;
use workload::{Input, WorkloadSet};

/// One element of an argument template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Passed through verbatim.
    Lit(String),

    /// Path of a workload input.
    Input(Input),

    /// Directory the profiled program writes its CPU profile into.
    ProfileDir,

    /// `host:port` of the server's primary service.
    ServiceAddr,

    /// Port of the server's primary service.
    ServicePort,

    /// `host:port` of the server's administrative profiling endpoint.
    ProfileEndpoint,

    /// Seconds after which a follow program shuts itself down.
    ShutdownAfter,
}

/// Values an argument template is expanded against.
pub struct ArgContext<'a> {
    pub workloads: &'a WorkloadSet,
    pub profile_dir: Option<&'a Path>,
    pub service_addr: &'a str,
    pub service_port: u16,
    pub profile_endpoint: &'a str,
    pub shutdown_after_secs: u64,
}

impl<'a> ArgContext<'a> {
    /// Context for a run under `setting`.
    pub fn new(
        setting: &'a Setting,
        workloads: &'a WorkloadSet,
        profile_dir: Option<&'a Path>,
    ) -> Result<ArgContext<'a>> {
        Ok(ArgContext {
            workloads: workloads,
            profile_dir: profile_dir,
            service_addr: &setting.server.listen,
            service_port: setting.listen_port()?,
            profile_endpoint: &setting.server.pprof,
            shutdown_after_secs: setting.timing.shutdown_after_secs,
        })
    }
}

/// A client invocation used to put load on a server program.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    /// Name of the program whose baseline binary acts as the client.
    pub program: String,
    pub args: Vec<Arg>,
}

/// How a program is driven during capture.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Processes its input files once and exits.
    OneShot { args: Vec<Arg> },

    /// Follows a file that grows while it runs and stops itself after a
    /// fixed duration.
    Follow { args: Vec<Arg> },

    /// Serves clients until interrupted; profiled over its admin endpoint.
    Server { args: Vec<Arg>, clients: Vec<ClientSpec> },
}

/// Immutable description of one program.
#[derive(Debug, Clone)]
pub struct ProgramSpec {
    pub name: String,

    /// Source package handed to the compiler, relative to the package prefix.
    pub package: String,

    pub shape: Shape,

    /// Arguments for the comparison run. `None` means the program is not
    /// compared.
    pub bench: Option<Vec<Arg>>,
}

impl Arg {
    fn lit(s: &str) -> Arg {
        Arg::Lit(s.to_string())
    }

    fn expand(&self, ctx: &ArgContext) -> Result<OsString> {
        let arg = match *self {
            Arg::Lit(ref s) => OsString::from(s),
            Arg::Input(input) => ctx.workloads.path(input).as_os_str().to_os_string(),
            Arg::ProfileDir => match ctx.profile_dir {
                Some(dir) => dir.as_os_str().to_os_string(),
                None => bail!(ErrorKind::Setting("no profile directory for template".into())),
            },
            Arg::ServiceAddr => OsString::from(ctx.service_addr),
            Arg::ServicePort => OsString::from(ctx.service_port.to_string()),
            Arg::ProfileEndpoint => OsString::from(ctx.profile_endpoint),
            Arg::ShutdownAfter => OsString::from(ctx.shutdown_after_secs.to_string()),
        };
        Ok(arg)
    }
}

/// Expands a template into concrete arguments.
pub fn expand(template: &[Arg], ctx: &ArgContext) -> Result<Vec<OsString>> {
    template.iter().map(|a| a.expand(ctx)).collect()
}

impl ProgramSpec {
    /// Arguments used while capturing a profile.
    pub fn profile_args(&self) -> &[Arg] {
        match self.shape {
            Shape::OneShot { ref args } |
            Shape::Follow { ref args } |
            Shape::Server { ref args, .. } => args,
        }
    }

    pub fn is_server(&self) -> bool {
        match self.shape {
            Shape::Server { .. } => true,
            _ => false,
        }
    }

    /// Looks up a program in the built-in catalog.
    pub fn known(name: &str) -> Result<ProgramSpec> {
        catalog()
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ErrorKind::UnknownProgram(name.to_string()).into())
    }

    /// Resolves a list of names, defaulting to the whole catalog.
    pub fn resolve(names: &[String]) -> Result<Vec<ProgramSpec>> {
        if names.is_empty() {
            return Ok(catalog());
        }
        names.iter().map(|n| ProgramSpec::known(n)).collect()
    }
}

fn profiled(rest: &[Arg]) -> Vec<Arg> {
    let mut args = vec![
        Arg::lit("-cfg"),
        Arg::lit("none"),
        Arg::lit("-plain"),
        Arg::lit("-profile"),
        Arg::lit("-profiledir"),
        Arg::ProfileDir,
    ];
    args.extend_from_slice(rest);
    args
}

fn plain(rest: &[Arg]) -> Vec<Arg> {
    let mut args = vec![Arg::lit("-cfg"), Arg::lit("none"), Arg::lit("-plain")];
    args.extend_from_slice(rest);
    args
}

fn client(program: &str, rest: &[Arg]) -> ClientSpec {
    let mut args = vec![
        Arg::lit("-cfg"),
        Arg::lit("none"),
        Arg::lit("-server"),
        Arg::ServiceAddr,
    ];
    args.extend_from_slice(rest);
    ClientSpec {
        program: program.to_string(),
        args: args,
    }
}

/// The programs this pipeline knows how to drive.
pub fn catalog() -> Vec<ProgramSpec> {
    let status_query = Arg::lit("select status, count(*) group by status");
    vec![
        ProgramSpec {
            name: "dtail".into(),
            package: "dtail".into(),
            shape: Shape::Follow {
                args: profiled(&[
                    Arg::lit("-regex"),
                    Arg::lit("ERROR|WARN"),
                    Arg::lit("-shutdownAfter"),
                    Arg::ShutdownAfter,
                    Arg::Input(Input::GrowingLog),
                ]),
            },
            bench: None,
        },
        ProgramSpec {
            name: "dcat".into(),
            package: "dcat".into(),
            shape: Shape::OneShot { args: profiled(&[Arg::Input(Input::Log)]) },
            bench: Some(plain(&[Arg::Input(Input::Log)])),
        },
        ProgramSpec {
            name: "dgrep".into(),
            package: "dgrep".into(),
            shape: Shape::OneShot {
                args: profiled(&[
                    Arg::lit("-regex"),
                    Arg::lit("ERROR|WARN"),
                    Arg::Input(Input::Log),
                ]),
            },
            bench: Some(plain(&[
                Arg::lit("-regex"),
                Arg::lit("ERROR"),
                Arg::Input(Input::Log),
            ])),
        },
        ProgramSpec {
            name: "dmap".into(),
            package: "dmap".into(),
            shape: Shape::OneShot {
                args: profiled(&[
                    Arg::lit("-files"),
                    Arg::Input(Input::Tabular),
                    Arg::lit("-query"),
                    status_query.clone(),
                ]),
            },
            bench: Some(plain(&[
                Arg::lit("-files"),
                Arg::Input(Input::Tabular),
                Arg::lit("-query"),
                Arg::lit("select count(*)"),
            ])),
        },
        ProgramSpec {
            name: "dserver".into(),
            package: "dserver".into(),
            shape: Shape::Server {
                args: vec![
                    Arg::lit("-cfg"),
                    Arg::lit("none"),
                    Arg::lit("-pprof"),
                    Arg::ProfileEndpoint,
                    Arg::lit("-port"),
                    Arg::ServicePort,
                ],
                clients: vec![
                    client("dcat", &[Arg::Input(Input::Log)]),
                    client(
                        "dgrep",
                        &[Arg::lit("-regex"), Arg::lit("ERROR|WARN"), Arg::Input(Input::Log)],
                    ),
                    client(
                        "dgrep",
                        &[Arg::lit("-regex"), Arg::lit("INFO.*action"), Arg::Input(Input::Log)],
                    ),
                    client(
                        "dmap",
                        &[
                            Arg::lit("-files"),
                            Arg::Input(Input::Tabular),
                            Arg::lit("-query"),
                            status_query,
                        ],
                    ),
                    client(
                        "dmap",
                        &[
                            Arg::lit("-files"),
                            Arg::Input(Input::Tabular),
                            Arg::lit("-query"),
                            Arg::lit("select action, avg(duration) group by action"),
                        ],
                    ),
                ],
            },
            bench: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workloads() -> WorkloadSet {
        WorkloadSet {
            log: PathBuf::from("/data/test.log"),
            tabular: PathBuf::from("/data/test.csv"),
            growing_log: PathBuf::from("/data/growing.log"),
        }
    }

    #[test]
    fn expands_inputs_and_profile_dir() {
        let w = workloads();
        let dir = PathBuf::from("/tmp/iter_dgrep_0");
        let ctx = ArgContext {
            workloads: &w,
            profile_dir: Some(&dir),
            service_addr: "localhost:12222",
            service_port: 12222,
            profile_endpoint: "localhost:16060",
            shutdown_after_secs: 3,
        };
        let dgrep = ProgramSpec::known("dgrep").unwrap();
        let args = expand(dgrep.profile_args(), &ctx).unwrap();
        assert_eq!(
            args,
            vec![
                "-cfg",
                "none",
                "-plain",
                "-profile",
                "-profiledir",
                "/tmp/iter_dgrep_0",
                "-regex",
                "ERROR|WARN",
                "/data/test.log",
            ].into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn profile_dir_required_when_templated() {
        let w = workloads();
        let ctx = ArgContext {
            workloads: &w,
            profile_dir: None,
            service_addr: "localhost:12222",
            service_port: 12222,
            profile_endpoint: "localhost:16060",
            shutdown_after_secs: 3,
        };
        let dcat = ProgramSpec::known("dcat").unwrap();
        assert!(expand(dcat.profile_args(), &ctx).is_err());
        // benchmark templates never reference the profile directory
        assert!(expand(dcat.bench.as_ref().unwrap(), &ctx).is_ok());
    }

    #[test]
    fn server_template_uses_endpoints() {
        let w = workloads();
        let setting = Setting::default();
        let ctx = ArgContext::new(&setting, &w, None).unwrap();
        let server = ProgramSpec::known("dserver").unwrap();
        assert!(server.is_server());
        let args = expand(server.profile_args(), &ctx).unwrap();
        assert!(args.contains(&OsString::from("localhost:16060")));
        assert!(args.contains(&OsString::from("12222")));
        if let Shape::Server { ref clients, .. } = server.shape {
            assert_eq!(clients.len(), 5);
            let first = expand(&clients[0].args, &ctx).unwrap();
            assert!(first.contains(&OsString::from("localhost:12222")));
        } else {
            panic!("dserver is not a server");
        }
    }

    #[test]
    fn resolve_defaults_to_catalog() {
        assert_eq!(ProgramSpec::resolve(&[]).unwrap().len(), 5);
        let names = vec!["dcat".to_string(), "nope".to_string()];
        assert!(ProgramSpec::resolve(&names).is_err());
    }
}
