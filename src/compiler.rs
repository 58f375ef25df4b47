//! The compiler seam.
//!
//! The pipeline only ever asks for "build this package into this path,
//! optionally with this profile". `Toolchain` answers by running the
//! configured build command inside the source tree.

use errors::*;
use process::{Invocation, Outcome, Runner};
use setting::Setting;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub trait Compiler {
    /// Builds `package` into `output`, guided by `profile` when given.
    ///
    /// Implementations must refuse a profile that is empty.
    fn build(&self, output: &Path, package: &str, profile: Option<&Path>) -> Result<()>;
}

/// Runs the external toolchain from the setting.
pub struct Toolchain<'a> {
    setting: &'a Setting,
    runner: &'a Runner,
}

impl<'a> Toolchain<'a> {
    pub fn new(setting: &'a Setting, runner: &'a Runner) -> Self {
        Toolchain {
            setting: setting,
            runner: runner,
        }
    }

    fn invocation(&self, output: &Path, package: &str, profile: Option<&Path>) -> Result<Invocation> {
        let tc = &self.setting.toolchain;
        let (tool, fixed) = tc.build
            .split_first()
            .ok_or_else(|| ErrorKind::Setting("toolchain.build is empty".into()))?;
        let mut inv = Invocation::new(tool).args(fixed);
        if let Some(profile) = profile {
            inv = inv.arg(&tc.profile_flag).arg(absolute(profile)?);
        }
        Ok(inv.arg(&tc.output_flag)
            .arg(absolute(output)?)
            .arg(format!("{}{}", tc.package_prefix, package))
            .current_dir(&self.setting.source_dir))
    }
}

impl<'a> Compiler for Toolchain<'a> {
    fn build(&self, output: &Path, package: &str, profile: Option<&Path>) -> Result<()> {
        if let Some(profile) = profile {
            if fs::metadata(profile)?.len() == 0 {
                bail!(ErrorKind::EmptyProfile(profile.to_path_buf()));
            }
        }
        let inv = self.invocation(output, package, profile)?;
        info!("building {}", inv);
        let done = self.runner.run(&inv, None)?;
        match done.outcome {
            Outcome::Exited(0) => {
                debug!("built {:?} in {:?}", output, done.elapsed);
                Ok(())
            }
            outcome => {
                warn!("{} finished with {}", inv, outcome);
                bail!(ErrorKind::Build(package.to_string()))
            }
        }
    }
}

/// Paths are handed to a tool running in another directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
