//! Folding per-iteration profiles into one profile per program.
//!
//! Zero-length artifacts carry no samples and are ignored. What is left
//! decides the strategy: nothing valid gives an empty merged profile, one
//! valid artifact is moved into place, more than one goes through the
//! external merge tool. Iteration artifacts are always deleted afterwards.

use capture::IterationArtifact;
use errors::*;
use process::{Invocation, Outcome, Runner};
use setting::Setting;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// The profile an optimized build is compiled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedProfile {
    pub program: String,
    pub path: PathBuf,
    pub len: u64,
}

impl MergedProfile {
    /// An empty profile must never reach the compiler.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct Merger<'a> {
    setting: &'a Setting,
    runner: &'a Runner,
}

impl<'a> Merger<'a> {
    pub fn new(setting: &'a Setting, runner: &'a Runner) -> Self {
        Merger {
            setting: setting,
            runner: runner,
        }
    }

    /// Merges `artifacts` into the canonical profile of `program`.
    pub fn merge(&self, program: &str, artifacts: Vec<IterationArtifact>) -> Result<MergedProfile> {
        let output = self.setting.merged_profile(program);
        let valid = artifacts
            .iter()
            .filter(|a| a.len() > 0)
            .map(|a| a.path.clone())
            .collect::<Vec<_>>();
        if valid.len() < artifacts.len() {
            debug!(
                "{}: ignoring {} empty profiles",
                program,
                artifacts.len() - valid.len()
            );
        }

        let merged = match valid.len() {
            0 => {
                warn!("{}: every profile is empty, the workload may be I/O bound", program);
                File::create(&output).map(|_| ()).map_err(Error::from)
            }
            1 => fs::rename(&valid[0], &output).map_err(Error::from),
            n => {
                info!("{}: merging {} profiles", program, n);
                self.combine(program, &valid, &output)
            }
        };
        for artifact in &artifacts {
            artifact.discard();
        }
        merged?;

        let len = fs::metadata(&output)?.len();
        info!("{}: merged profile {:?} ({} bytes)", program, output, len);
        Ok(MergedProfile {
            program: program.to_string(),
            path: output,
            len: len,
        })
    }

    /// Runs the merge tool with its stdout redirected into a temporary file
    /// that replaces `output` only on success.
    fn combine(&self, program: &str, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let (tool, fixed) = self.setting
            .toolchain
            .merge
            .split_first()
            .ok_or_else(|| ErrorKind::Setting("toolchain.merge is empty".into()))?;
        let inv = Invocation::new(tool).args(fixed).args(inputs);
        let tmp = output.with_extension("pprof.tmp");
        let stdout = File::create(&tmp)?;

        let merged = self.runner
            .spawn_with_stdout(&inv, Stdio::from(stdout))
            .and_then(|mut handle| handle.wait(None));
        let result = match merged {
            Ok(Outcome::Exited(0)) => fs::rename(&tmp, output).map_err(Error::from),
            Ok(outcome) => {
                warn!("{} finished with {}", inv, outcome);
                Err(ErrorKind::Merge(program.to_string()).into())
            }
            Err(e) => Err(Error::with_chain(e, ErrorKind::Merge(program.to_string()))),
        };
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setting(dir: &TempDir, merge: &[&str]) -> Setting {
        let mut setting = Setting::default();
        setting.profile_dir = dir.path().to_path_buf();
        setting.toolchain.merge = merge.iter().map(|s| s.to_string()).collect();
        setting
    }

    fn artifacts(setting: &Setting, contents: &[&str]) -> Vec<IterationArtifact> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let path = setting.profile_dir.join(format!("prog.{}.pprof", i));
                fs::write(&path, c).unwrap();
                IterationArtifact {
                    program: "prog".into(),
                    iteration: i,
                    path: path,
                }
            })
            .collect()
    }

    fn gone(list: &[IterationArtifact]) -> bool {
        list.iter().all(|a| !a.path.exists())
    }

    #[test]
    fn all_empty_gives_empty_profile() {
        let dir = TempDir::new().unwrap();
        let setting = setting(&dir, &["false"]);
        let runner = Runner::new(false);
        let list = artifacts(&setting, &["", "", ""]);

        let merged = Merger::new(&setting, &runner).merge("prog", list.clone()).unwrap();
        assert!(merged.is_empty());
        assert_eq!(fs::metadata(&merged.path).unwrap().len(), 0);
        assert!(gone(&list));
    }

    #[test]
    fn single_valid_profile_is_moved() {
        let dir = TempDir::new().unwrap();
        // the merge tool would fail if it were invoked
        let setting = setting(&dir, &["false"]);
        let runner = Runner::new(false);
        let list = artifacts(&setting, &["", "only", ""]);

        let merged = Merger::new(&setting, &runner).merge("prog", list.clone()).unwrap();
        assert_eq!(merged.path, dir.path().join("prog.pprof"));
        assert_eq!(merged.len, 4);
        assert_eq!(fs::read_to_string(&merged.path).unwrap(), "only");
        assert!(gone(&list));
    }

    #[test]
    fn several_profiles_go_through_the_tool() {
        let dir = TempDir::new().unwrap();
        let setting = setting(&dir, &["cat"]);
        let runner = Runner::new(false);
        let list = artifacts(&setting, &["a", "", "b"]);

        let merged = Merger::new(&setting, &runner).merge("prog", list.clone()).unwrap();
        assert_eq!(fs::read_to_string(&merged.path).unwrap(), "ab");
        assert!(!dir.path().join("prog.pprof.tmp").exists());
        assert!(gone(&list));
    }

    #[test]
    fn failed_tool_keeps_previous_profile() {
        let dir = TempDir::new().unwrap();
        let setting = setting(&dir, &["false"]);
        let runner = Runner::new(false);
        fs::write(setting.merged_profile("prog"), "previous").unwrap();
        let list = artifacts(&setting, &["a", "b"]);

        let err = Merger::new(&setting, &runner)
            .merge("prog", list.clone())
            .unwrap_err();
        match *err.kind() {
            ErrorKind::Merge(ref p) => assert_eq!(p, "prog"),
            ref other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(setting.merged_profile("prog")).unwrap(),
            "previous"
        );
        assert!(!dir.path().join("prog.pprof.tmp").exists());
        assert!(gone(&list));
    }
}
