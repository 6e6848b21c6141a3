//! Suite orchestration: every test of a suite file becomes a timestamped
//! results directory holding the config snapshot, the raw per-collective
//! output, a `results.csv` summary and a `sweep_report.json`.

use crate::command::{CommandBuilder, EnvInjection, Launcher};
use crate::executor::{ProcessRunner, SweepExecutor, SweepReport, SystemRunner};
use anyhow::Result;
use ccl_analysis::{load_result_records, summarize, write_summary_csv};
use ccl_core::suite::{load_suite, Suite};
use ccl_core::{atomic_write_json_pretty, ensure_dir};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub launcher: Launcher,
    pub injection: EnvInjection,
    pub timeout: Option<Duration>,
    pub results_root: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            launcher: Launcher::default(),
            injection: EnvInjection::default(),
            timeout: None,
            results_root: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    Invalid {
        error: String,
    },
    Completed {
        dir: PathBuf,
        sweep: SweepReport,
        records: usize,
        groups: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    pub fn failed_units(&self) -> usize {
        self.tests
            .iter()
            .map(|t| match &t.outcome {
                TestOutcome::Completed { sweep, .. } => sweep.failed().count(),
                TestOutcome::Invalid { .. } => 0,
            })
            .sum()
    }

    pub fn invalid_tests(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| matches!(t.outcome, TestOutcome::Invalid { .. }))
            .count()
    }
}

pub fn run_suite(
    config_path: &Path,
    executable_dir: &Path,
    options: &RunnerOptions,
) -> Result<SuiteReport> {
    let suite = load_suite(config_path)?;
    let runner = SystemRunner {
        timeout: options.timeout,
    };
    run_suite_with(&suite, executable_dir, options, runner)
}

pub fn run_suite_with<R: ProcessRunner>(
    suite: &Suite,
    executable_dir: &Path,
    options: &RunnerOptions,
    runner: R,
) -> Result<SuiteReport> {
    let output_root = options.results_root.join(suite.stem());
    ensure_dir(&output_root)?;
    let builder = CommandBuilder::new(options.launcher.clone(), options.injection);
    let mut executor = SweepExecutor::new(builder, runner);

    let mut tests = Vec::with_capacity(suite.entries.len());
    for entry in &suite.entries {
        let def = match entry.validate() {
            Ok(def) => def,
            Err(err) => {
                tracing::warn!(test = %entry.name, error = %err, "skipping invalid test definition");
                tests.push(TestReport {
                    name: entry.name.clone(),
                    outcome: TestOutcome::Invalid {
                        error: err.to_string(),
                    },
                });
                continue;
            }
        };

        let test_dir = output_root
            .join(&entry.name)
            .join(Utc::now().format("%Y%m%d_%H%M%S").to_string());
        ensure_dir(&test_dir)?;
        fs::copy(&suite.path, test_dir.join("config.yaml"))?;

        let sweep = executor.run(&def, executable_dir, &test_dir);

        let mut records = Vec::new();
        for unit in &sweep.units {
            if !unit.output_path.exists() {
                continue;
            }
            match load_result_records(&unit.output_path) {
                Ok(mut parsed) => records.append(&mut parsed),
                Err(err) => tracing::warn!(
                    file = %unit.output_path.display(),
                    error = %err,
                    "could not read benchmark output"
                ),
            }
        }
        let summary = summarize(&records);
        write_summary_csv(&summary, &test_dir)?;

        let outcome = TestOutcome::Completed {
            dir: test_dir.clone(),
            sweep,
            records: records.len(),
            groups: summary.len(),
        };
        atomic_write_json_pretty(
            &test_dir.join("sweep_report.json"),
            &serde_json::to_value(&outcome)?,
        )?;
        tracing::info!(
            test = %entry.name,
            records = records.len(),
            groups = summary.len(),
            "test finished"
        );
        tests.push(TestReport {
            name: entry.name.clone(),
            outcome,
        });
    }

    Ok(SuiteReport {
        suite: suite.stem(),
        tests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::InvocationDescriptor;
    use crate::executor::ProcessExit;
    use ccl_core::atomic_write_bytes;
    use std::io;

    /// Writes two line-delimited records for every invocation and succeeds,
    /// except for `broadcast`, which fails without output.
    struct FakeBenchmark;

    impl ProcessRunner for FakeBenchmark {
        fn run(&mut self, invocation: &InvocationDescriptor) -> io::Result<ProcessExit> {
            if invocation.output_path.ends_with("broadcast_perf.json") {
                return Ok(ProcessExit::Code(1));
            }
            let body = "{\"type\":\"float\",\"redop\":\"sum\",\"size\":8,\"inPlace\":0,\"time\":2.0}\n\
                        {\"type\":\"float\",\"redop\":\"sum\",\"size\":8,\"inPlace\":0,\"time\":4.0}\n";
            atomic_write_bytes(&invocation.output_path, body.as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Ok(ProcessExit::Code(0))
        }
    }

    const SUITE: &str = r#"
good:
  collectives: [all_reduce, broadcast]
  start_size: 8
  end_size: 8
  iterations: 1
  operation: [sum]
  step_details: [{type: multiple, value: 2}]
  datatypes: [float]
bad:
  collectives: [not_a_collective]
  start_size: 8
  end_size: 8
  iterations: 1
  operation: [sum]
  datatypes: [float]
"#;

    #[test]
    fn suite_runs_valid_tests_and_reports_invalid_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("nightly.yaml");
        fs::write(&config, SUITE).expect("suite");
        let suite = load_suite(&config).expect("load");
        let options = RunnerOptions {
            results_root: dir.path().join("results"),
            ..RunnerOptions::default()
        };

        let report =
            run_suite_with(&suite, Path::new("/opt/bin"), &options, FakeBenchmark).expect("run");
        assert_eq!(report.suite, "nightly");
        assert_eq!(report.tests.len(), 2);
        assert_eq!(report.invalid_tests(), 1);
        assert_eq!(report.failed_units(), 1);

        let TestOutcome::Completed {
            dir: test_dir,
            records,
            groups,
            ..
        } = &report.tests[0].outcome
        else {
            panic!("first test should complete");
        };
        assert_eq!(*records, 2);
        assert_eq!(*groups, 1);
        assert!(test_dir.join("config.yaml").exists());
        assert!(test_dir.join("sweep_report.json").exists());
        let csv = fs::read_to_string(test_dir.join("results.csv")).expect("csv");
        assert!(csv.contains("float,sum,8,0,2,3"), "{csv}");
        // results/<suite>/<test>/<timestamp>: the layout ingestion attributes bundles by.
        assert_eq!(
            test_dir
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|s| s.to_str()),
            Some("good")
        );
    }
}
