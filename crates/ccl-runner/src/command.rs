use ccl_core::config::StepKind;
use ccl_core::{EnvBundle, TestDefinition};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    Direct,
    Mpi {
        program: String,
        ranks: u32,
        args: Vec<String>,
    },
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::Mpi {
            program: "mpirun".to_string(),
            ranks: 8,
            args: [
                "--mca",
                "pml",
                "ucx",
                "--mca",
                "btl",
                "^openib",
                "-x",
                "NCCL_DEBUG=VERSION",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvInjection {
    #[default]
    Environment,
    /// As `-x NAME=VALUE` launcher arguments. Falls back to the environment
    /// for [`Launcher::Direct`].
    LauncherArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationDescriptor {
    pub program: String,
    pub args: Vec<String>,
    /// Overlay on the ambient environment; the ambient one is inherited at spawn.
    pub env: BTreeMap<String, String>,
    pub output_path: PathBuf,
}

impl InvocationDescriptor {
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn command_line(&self) -> String {
        let env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut parts = env;
        parts.extend(self.argv());
        shell_join(&parts)
    }
}

pub const OUTPUT_FORMAT: &str = "json";

#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    pub launcher: Launcher,
    pub injection: EnvInjection,
}

impl CommandBuilder {
    pub fn new(launcher: Launcher, injection: EnvInjection) -> Self {
        Self {
            launcher,
            injection,
        }
    }

    /// `{output_dir}/{executable stem}.json` is where the benchmark writes.
    pub fn output_path(executable: &Path, output_dir: &Path) -> PathBuf {
        let stem = executable
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("benchmark");
        output_dir.join(format!("{}.{}", stem, OUTPUT_FORMAT))
    }

    pub fn build(
        &self,
        executable: &Path,
        def: &TestDefinition,
        bundle: &EnvBundle,
        output_dir: &Path,
    ) -> InvocationDescriptor {
        let output_path = Self::output_path(executable, output_dir);
        let bench_args = benchmark_args(def, &output_path);
        let executable = executable.to_string_lossy().to_string();

        let mut env = BTreeMap::new();
        env.insert("OMPI_ALLOW_RUN_AS_ROOT".to_string(), "1".to_string());
        env.insert("OMPI_ALLOW_RUN_AS_ROOT_CONFIRM".to_string(), "1".to_string());

        let (program, args) = match &self.launcher {
            Launcher::Direct => {
                for (name, value) in bundle.active() {
                    env.insert(name.to_string(), value.to_string());
                }
                (executable, bench_args)
            }
            Launcher::Mpi {
                program,
                ranks,
                args: launcher_args,
            } => {
                let mut args = vec!["-np".to_string(), ranks.to_string()];
                args.extend(launcher_args.iter().cloned());
                for (name, value) in bundle.active() {
                    match self.injection {
                        EnvInjection::Environment => {
                            env.insert(name.to_string(), value.to_string());
                        }
                        EnvInjection::LauncherArgs => {
                            args.push("-x".to_string());
                            args.push(format!("{}={}", name, value));
                        }
                    }
                }
                args.push(executable);
                args.extend(bench_args);
                (program.clone(), args)
            }
        };

        InvocationDescriptor {
            program,
            args,
            env,
            output_path,
        }
    }
}

fn benchmark_args(def: &TestDefinition, output_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        def.datatypes().join(","),
        "-b".to_string(),
        def.start_size().as_arg(),
        "-e".to_string(),
        def.end_size().as_arg(),
    ];
    if let Some(step) = def.step() {
        let flag = match step.kind {
            StepKind::Multiple => "-f",
            StepKind::Increment => "-i",
        };
        args.push(flag.to_string());
        args.push(step.value.to_string());
    }
    args.extend([
        "-g".to_string(),
        def.gpus_per_thread().to_string(),
        "-n".to_string(),
        def.iterations().to_string(),
        "-o".to_string(),
        def.operations().join(","),
        "--output_file".to_string(),
        output_path.to_string_lossy().to_string(),
        "--output_format".to_string(),
        OUTPUT_FORMAT.to_string(),
    ]);
    args
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,^".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> TestDefinition {
        TestDefinition::validate(&json!({
            "collectives": ["all_reduce"],
            "start_size": 1,
            "end_size": 1024,
            "iterations": 5,
            "operation": ["sum"],
            "step_details": [{"type": "multiple", "value": 2}],
            "datatypes": ["float"],
            "ENV_VARS": [
                {"id": "NCCL_MAX_NCHANNELS", "value": 16},
                {"id": "NCCL_MIN_CTAS", "value": "default"}
            ]
        }))
        .expect("valid definition")
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn end_to_end_flags_are_present() {
        let def = definition();
        let bundle = EnvBundle::from_overrides(def.env_vars());
        let inv = CommandBuilder::default().build(
            Path::new("/opt/rccl-tests/build/all_reduce_perf"),
            &def,
            &bundle,
            Path::new("/results/t"),
        );
        assert_eq!(inv.program, "mpirun");
        assert_eq!(flag_value(&inv.args, "-d"), Some("float"));
        assert_eq!(flag_value(&inv.args, "-o"), Some("sum"));
        assert_eq!(flag_value(&inv.args, "-f"), Some("2"));
        assert!(!inv.args.iter().any(|a| a == "-i"));
        assert_eq!(flag_value(&inv.args, "-b"), Some("1"));
        assert_eq!(flag_value(&inv.args, "-e"), Some("1024"));
        assert_eq!(flag_value(&inv.args, "--output_format"), Some("json"));
        assert_eq!(
            inv.output_path,
            PathBuf::from("/results/t/all_reduce_perf.json")
        );
    }

    #[test]
    fn build_is_deterministic() {
        let def = definition();
        let bundle = EnvBundle::from_overrides(def.env_vars());
        let builder = CommandBuilder::new(Launcher::default(), EnvInjection::LauncherArgs);
        let a = builder.build(Path::new("x/reduce_perf"), &def, &bundle, Path::new("out"));
        let b = builder.build(Path::new("x/reduce_perf"), &def, &bundle, Path::new("out"));
        assert_eq!(a, b);
        assert_eq!(a.command_line(), b.command_line());
    }

    #[test]
    fn default_valued_overrides_are_omitted() {
        let def = definition();
        let bundle = EnvBundle::from_overrides(def.env_vars());

        let env_mode = CommandBuilder::default().build(
            Path::new("reduce_perf"),
            &def,
            &bundle,
            Path::new("out"),
        );
        assert_eq!(
            env_mode.env.get("NCCL_MAX_NCHANNELS").map(String::as_str),
            Some("16")
        );
        assert!(!env_mode.env.contains_key("NCCL_MIN_CTAS"));

        let arg_mode = CommandBuilder::new(Launcher::default(), EnvInjection::LauncherArgs)
            .build(Path::new("reduce_perf"), &def, &bundle, Path::new("out"));
        assert!(arg_mode.args.contains(&"NCCL_MAX_NCHANNELS=16".to_string()));
        assert!(!arg_mode.args.iter().any(|a| a.starts_with("NCCL_MIN_CTAS")));
        assert!(!arg_mode.env.contains_key("NCCL_MAX_NCHANNELS"));
    }

    #[test]
    fn suffixed_sizes_are_not_double_suffixed() {
        let def = TestDefinition::validate(&json!({
            "collectives": ["broadcast"],
            "start_size": "1k",
            "end_size": "16g",
            "iterations": 1,
            "operation": ["all"],
            "step_details": [{"type": "increment", "value": 1024}],
            "datatypes": ["all"]
        }))
        .expect("valid");
        let inv = CommandBuilder::new(Launcher::Direct, EnvInjection::Environment).build(
            Path::new("/bin/broadcast_perf"),
            &def,
            &EnvBundle::new(),
            Path::new("out"),
        );
        assert_eq!(inv.program, "/bin/broadcast_perf");
        assert_eq!(flag_value(&inv.args, "-b"), Some("1k"));
        assert_eq!(flag_value(&inv.args, "-e"), Some("16g"));
        assert_eq!(flag_value(&inv.args, "-i"), Some("1024"));
        assert!(!inv.args.iter().any(|a| a == "-f"));
    }

    #[test]
    fn shell_quote_wraps_unsafe_parts() {
        assert_eq!(
            shell_join(&["a b".to_string(), "it's".to_string(), "x=1".to_string()]),
            "'a b' 'it'\"'\"'s' x=1"
        );
    }
}
