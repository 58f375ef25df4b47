//! Per-program outcome of a pipeline run.

use compare::Comparison;
use csv;
use errors::*;
use prettytable::Table;
use std::fmt;
use std::path::Path;

/// Result of one pipeline stage for one program.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    NotAttempted,
    Ok,
    Skipped(String),
    Failed(String),
}

impl Stage {
    pub fn is_ok(&self) -> bool {
        *self == Stage::Ok
    }

    pub fn is_failed(&self) -> bool {
        match *self {
            Stage::Failed(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Stage::NotAttempted => write!(f, "-"),
            Stage::Ok => write!(f, "ok"),
            Stage::Skipped(ref why) => write!(f, "skipped: {}", why),
            Stage::Failed(ref why) => write!(f, "failed: {}", why),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramReport {
    pub name: String,
    pub baseline: Stage,
    pub capture: Stage,
    pub optimized: Stage,
    pub comparison: Option<Comparison>,
}

impl ProgramReport {
    fn new(name: String) -> Self {
        ProgramReport {
            name: name,
            baseline: Stage::NotAttempted,
            capture: Stage::NotAttempted,
            optimized: Stage::NotAttempted,
            comparison: None,
        }
    }

    fn improvement(&self) -> String {
        match self.comparison.and_then(|c| c.improvement()) {
            Some(ratio) => format!("{:+.1}%", ratio * 100.0),
            None => "-".into(),
        }
    }
}

/// One entry per configured program, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub programs: Vec<ProgramReport>,
}

impl RunReport {
    pub fn new<I: IntoIterator<Item = String>>(names: I) -> Self {
        RunReport {
            programs: names.into_iter().map(ProgramReport::new).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProgramReport> {
        self.programs.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProgramReport> {
        self.programs.iter_mut().find(|p| p.name == name)
    }

    /// `false` if any build stage failed. Capture problems only cost a
    /// program its optimization and do not fail the run.
    pub fn success(&self) -> bool {
        self.programs
            .iter()
            .all(|p| !p.baseline.is_failed() && !p.optimized.is_failed())
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row![
            "Program",
            "Baseline",
            "Profile",
            "Optimized",
            "Baseline (s)",
            "Optimized (s)",
            "Improvement"
        ]);
        for p in &self.programs {
            let (base, opt) = match p.comparison {
                Some(c) => (
                    format!("{:.3}", c.baseline_secs()),
                    format!("{:.3}", c.optimized_secs()),
                ),
                None => ("-".into(), "-".into()),
            };
            table.add_row(row![
                &p.name,
                p.baseline.to_string(),
                p.capture.to_string(),
                p.optimized.to_string(),
                base,
                opt,
                p.improvement()
            ]);
        }
        table
    }

    pub fn render(&self) -> String {
        self.table().to_string()
    }

    /// Writes one CSV record per program.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&[
            "program",
            "baseline",
            "capture",
            "optimized",
            "baseline_secs",
            "optimized_secs",
            "improvement",
        ])?;
        for p in &self.programs {
            let secs = |d: Option<f64>| d.map(|s| format!("{:.6}", s)).unwrap_or_default();
            let improvement = p.comparison
                .and_then(|c| c.improvement())
                .map(|r| format!("{:.6}", r))
                .unwrap_or_default();
            wtr.write_record(&[
                p.name.clone(),
                p.baseline.to_string(),
                p.capture.to_string(),
                p.optimized.to_string(),
                secs(p.comparison.map(|c| c.baseline_secs())),
                secs(p.comparison.map(|c| c.optimized_secs())),
                improvement,
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample() -> RunReport {
        let mut report = RunReport::new(vec!["a".to_string(), "b".to_string()]);
        {
            let a = report.get_mut("a").unwrap();
            a.baseline = Stage::Ok;
            a.capture = Stage::Ok;
            a.optimized = Stage::Ok;
            a.comparison = Some(Comparison {
                baseline: Duration::from_millis(2000),
                optimized: Duration::from_millis(1500),
            });
        }
        {
            let b = report.get_mut("b").unwrap();
            b.baseline = Stage::Ok;
            b.capture = Stage::Skipped("empty profile".into());
            b.optimized = Stage::Skipped("empty profile".into());
        }
        report
    }

    #[test]
    fn skips_do_not_fail_the_run() {
        let mut report = sample();
        assert!(report.success());
        report.get_mut("b").unwrap().capture = Stage::Failed("no profile".into());
        assert!(report.success());
        report.get_mut("b").unwrap().baseline = Stage::Failed("build".into());
        assert!(!report.success());
    }

    #[test]
    fn renders_every_program() {
        let out = sample().render();
        assert!(out.contains("Program"));
        assert!(out.contains("+25.0%"));
        assert!(out.contains("skipped: empty profile"));
        assert_eq!(RunReport::new(vec![]).programs.len(), 0);
    }

    #[test]
    fn csv_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        sample().write_csv(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("program,baseline"));
        assert!(lines[1].starts_with("a,ok,ok,ok,2.000000,1.500000,0.250000"));
        assert!(lines[2].ends_with(",,,"));
    }
}
