//! Runs one benchmark process per collective, one at a time. A failing unit
//! is logged and recorded; it never stops the rest of the sweep.

use crate::command::{CommandBuilder, InvocationDescriptor};
use ccl_core::{EnvBundle, TestDefinition};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal,
    TimedOut,
}

pub trait ProcessRunner {
    fn run(&mut self, invocation: &InvocationDescriptor) -> io::Result<ProcessExit>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// When set, a unit still running after this long is killed and reported
    /// as timed out; whatever it wrote to its output file is kept as-is.
    pub timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl SystemRunner {
    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<ProcessExit> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.code().map(ProcessExit::Code).unwrap_or(ProcessExit::Signal));
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(ProcessExit::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&mut self, invocation: &InvocationDescriptor) -> io::Result<ProcessExit> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn()?;
        match self.timeout {
            Some(timeout) => Self::wait_with_timeout(&mut child, timeout),
            None => {
                let status = child.wait()?;
                Ok(status.code().map(ProcessExit::Code).unwrap_or(ProcessExit::Signal))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    Failed { code: Option<i32> },
    LaunchError { message: String },
    TimedOut,
}

impl UnitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub collective: String,
    pub command_line: String,
    pub output_path: PathBuf,
    #[serde(flatten)]
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub units: Vec<UnitOutcome>,
}

impl SweepReport {
    pub fn failed(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| !u.status.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

pub fn executable_for(executable_dir: &Path, collective: &str) -> PathBuf {
    executable_dir.join(format!("{}_perf", collective))
}

pub struct SweepExecutor<R> {
    builder: CommandBuilder,
    runner: R,
}

impl<R: ProcessRunner> SweepExecutor<R> {
    pub fn new(builder: CommandBuilder, runner: R) -> Self {
        Self { builder, runner }
    }

    pub fn run_unit(
        &mut self,
        def: &TestDefinition,
        collective: &str,
        executable_dir: &Path,
        bundle: &EnvBundle,
        output_dir: &Path,
    ) -> UnitOutcome {
        let executable = executable_for(executable_dir, collective);
        let invocation = self.builder.build(&executable, def, bundle, output_dir);
        let command_line = invocation.command_line();
        tracing::info!(collective, command = %command_line, "launching benchmark");

        let status = match self.runner.run(&invocation) {
            Ok(ProcessExit::Code(0)) => UnitStatus::Succeeded,
            Ok(ProcessExit::Code(code)) => {
                tracing::warn!(collective, command = %command_line, code, "benchmark exited with non-zero status");
                UnitStatus::Failed { code: Some(code) }
            }
            Ok(ProcessExit::Signal) => {
                tracing::warn!(collective, command = %command_line, "benchmark terminated by signal");
                UnitStatus::Failed { code: None }
            }
            Ok(ProcessExit::TimedOut) => {
                tracing::warn!(collective, command = %command_line, "benchmark timed out and was killed");
                UnitStatus::TimedOut
            }
            Err(err) => {
                tracing::error!(collective, command = %command_line, error = %err, "failed to launch benchmark");
                UnitStatus::LaunchError {
                    message: err.to_string(),
                }
            }
        };

        UnitOutcome {
            collective: collective.to_string(),
            command_line,
            output_path: invocation.output_path,
            status,
        }
    }

    /// Every resolved collective of `def`, in order, under the definition's
    /// own env bundle. Always returns; failures are in the report.
    pub fn run(
        &mut self,
        def: &TestDefinition,
        executable_dir: &Path,
        output_dir: &Path,
    ) -> SweepReport {
        let bundle = EnvBundle::from_overrides(def.env_vars());
        let collectives = def.resolved_collectives();
        let mut report = SweepReport::default();
        for collective in &collectives {
            report
                .units
                .push(self.run_unit(def, collective, executable_dir, &bundle, output_dir));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Exit codes keyed by executable file name; anything else fails to launch.
    struct ScriptedRunner {
        exits: BTreeMap<String, ProcessExit>,
        seen: Vec<String>,
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(&mut self, invocation: &InvocationDescriptor) -> io::Result<ProcessExit> {
            let exe = invocation
                .output_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            self.seen.push(exe.clone());
            self.exits
                .get(&exe)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such executable"))
        }
    }

    fn def(collectives: serde_json::Value) -> TestDefinition {
        TestDefinition::validate(&json!({
            "collectives": collectives,
            "start_size": 1,
            "end_size": 64,
            "iterations": 1,
            "operation": ["sum"],
            "datatypes": ["float"]
        }))
        .expect("valid")
    }

    #[test]
    fn failures_do_not_stop_the_sweep() {
        let runner = ScriptedRunner {
            exits: [
                ("all_reduce_perf".to_string(), ProcessExit::Code(3)),
                ("reduce_perf".to_string(), ProcessExit::Code(0)),
            ]
            .into_iter()
            .collect(),
            seen: Vec::new(),
        };
        let mut exec = SweepExecutor::new(CommandBuilder::default(), runner);
        let report = exec.run(
            &def(json!(["all_reduce", "broadcast", "reduce"])),
            Path::new("/bin"),
            Path::new("/tmp/out"),
        );
        assert_eq!(report.units.len(), 3);
        assert_eq!(report.units[0].status, UnitStatus::Failed { code: Some(3) });
        assert!(matches!(
            report.units[1].status,
            UnitStatus::LaunchError { .. }
        ));
        assert_eq!(report.units[2].status, UnitStatus::Succeeded);
        assert_eq!(report.failed().count(), 2);
        assert!(report.units[1].command_line.contains("broadcast_perf"));
    }

    #[test]
    fn all_sentinel_runs_every_collective_once() {
        let runner = ScriptedRunner {
            exits: BTreeMap::new(),
            seen: Vec::new(),
        };
        let mut exec = SweepExecutor::new(CommandBuilder::default(), runner);
        let report = exec.run(&def(json!(["all"])), Path::new("/bin"), Path::new("out"));
        assert_eq!(report.units.len(), ccl_core::config::COLLECTIVES.len());
        let mut seen = exec.runner.seen.clone();
        seen.dedup();
        assert_eq!(seen.len(), ccl_core::config::COLLECTIVES.len());
        assert!(!seen.iter().any(|s| s == "all_perf"));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_exit_codes_and_missing_binaries() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).expect("bin dir");
        let write_script = |name: &str, body: &str| {
            let path = bin.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
        };
        write_script("gather_perf", "exit 0");
        write_script("scatter_perf", "exit 7");

        let mut exec = SweepExecutor::new(
            CommandBuilder::new(
                crate::command::Launcher::Direct,
                crate::command::EnvInjection::Environment,
            ),
            SystemRunner::default(),
        );
        let report = exec.run(
            &def(json!(["gather", "scatter", "sendrecv"])),
            &bin,
            dir.path(),
        );
        assert_eq!(report.units[0].status, UnitStatus::Succeeded);
        assert_eq!(report.units[1].status, UnitStatus::Failed { code: Some(7) });
        assert!(matches!(
            report.units[2].status,
            UnitStatus::LaunchError { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_kills_on_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reduce_perf");
        std::fs::write(&path, "#!/bin/sh\nsleep 5\n").expect("script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let mut exec = SweepExecutor::new(
            CommandBuilder::new(
                crate::command::Launcher::Direct,
                crate::command::EnvInjection::Environment,
            ),
            SystemRunner {
                timeout: Some(Duration::from_millis(200)),
            },
        );
        let outcome = exec.run_unit(
            &def(json!(["reduce"])),
            "reduce",
            dir.path(),
            &EnvBundle::new(),
            dir.path(),
        );
        assert_eq!(outcome.status, UnitStatus::TimedOut);
    }
}
