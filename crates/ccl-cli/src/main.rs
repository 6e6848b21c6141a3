use anyhow::{anyhow, Result};
use ccl_core::suite::{load_suite, resolve_config_path};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ccl", version = "0.3.0", about = "Collective benchmark sweep driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EnvModeArg {
    #[value(name = "environment")]
    Environment,
    #[value(name = "launcher_args")]
    LauncherArgs,
}

impl From<EnvModeArg> for ccl_runner::EnvInjection {
    fn from(value: EnvModeArg) -> Self {
        match value {
            EnvModeArg::Environment => ccl_runner::EnvInjection::Environment,
            EnvModeArg::LauncherArgs => ccl_runner::EnvInjection::LauncherArgs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run every test of a suite against the benchmark executables.
    Run {
        /// Suite name under ./configs/ or an explicit path.
        #[arg(long)]
        config: String,
        #[arg(long, default_value = "build")]
        executable_dir: PathBuf,
        #[arg(long, default_value = "results")]
        results_root: PathBuf,
        #[arg(long, value_enum)]
        env_mode: Option<EnvModeArg>,
        #[arg(long)]
        ranks: Option<u32>,
        /// Run the executable without the MPI launcher.
        #[arg(long)]
        direct: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a suite and print each test definition.
    Describe {
        #[arg(long)]
        config: String,
        #[arg(long)]
        json: bool,
    },
    /// Write the one-variable-at-a-time NCCL environment sweep suite.
    Generate {
        #[arg(long, default_value = "configs/nccl_env_sweep.yaml")]
        out: PathBuf,
    },
    /// Summarize result files or local run folders.
    Summarize {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Also write results.csv into this directory.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Ingest {
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    IngestCoverage {
        file: PathBuf,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Runs {
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    DeleteRun {
        label: String,
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compare benchmark runs under unified environment bundles.
    Compare {
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Pick the environment that wins most message sizes per collective and datatype.
    BestEnv {
        /// Run folders to read instead of the store.
        folders: Vec<PathBuf>,
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long, default_value = ccl_analysis::tuning::DEFAULT_METRIC)]
        metric: String,
        #[arg(long, default_value_t = ccl_analysis::tuning::DEFAULT_SIZE_THRESHOLD)]
        size_threshold: u64,
        #[arg(long)]
        json: bool,
    },
    /// List records that reported wrong results.
    WrongRecords {
        folders: Vec<PathBuf>,
        #[arg(long, default_value = "runs.db")]
        db: PathBuf,
        #[arg(long)]
        out_of_place_only: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            executable_dir,
            results_root,
            env_mode,
            ranks,
            direct,
            timeout_secs,
            json,
        } => {
            let options = runner_options(results_root, env_mode, ranks, direct, timeout_secs);
            let config_path = resolve_config_path(&config);
            let report = ccl_runner::run_suite(&config_path, &executable_dir, &options)?;
            if json {
                return Ok(Some(json!({
                    "ok": report.failed_units() == 0 && report.invalid_tests() == 0,
                    "command": "run",
                    "report": serde_json::to_value(&report)?,
                })));
            }
            println!("suite: {}", report.suite);
            for test in &report.tests {
                match &test.outcome {
                    ccl_runner::TestOutcome::Invalid { error } => {
                        println!("  {}: invalid ({})", test.name, error);
                    }
                    ccl_runner::TestOutcome::Completed {
                        dir,
                        sweep,
                        records,
                        groups,
                    } => {
                        println!(
                            "  {}: {} units, {} failed, {} records, {} groups -> {}",
                            test.name,
                            sweep.units.len(),
                            sweep.failed().count(),
                            records,
                            groups,
                            dir.display()
                        );
                    }
                }
            }
            println!("failed_units: {}", report.failed_units());
            println!("invalid_tests: {}", report.invalid_tests());
        }
        Commands::Describe { config, json } => {
            let suite = load_suite(&resolve_config_path(&config))?;
            let mut tests = Vec::new();
            for entry in &suite.entries {
                let described = match entry.validate() {
                    Ok(def) => json!({
                        "name": entry.name,
                        "valid": true,
                        "collectives": def.resolved_collectives(),
                        "definition": serde_json::to_value(&def)?,
                    }),
                    Err(err) => json!({
                        "name": entry.name,
                        "valid": false,
                        "error": err.to_string(),
                    }),
                };
                tests.push(described);
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "suite": suite.stem(),
                    "tests": tests,
                })));
            }
            println!("suite: {}", suite.stem());
            for test in &tests {
                println!("{}", serde_json::to_string_pretty(test)?);
            }
        }
        Commands::Generate { out } => {
            let sweep = ccl_core::generator::generate_env_sweep(
                &ccl_core::generator::default_nccl_axes(),
                &ccl_core::generator::default_template(),
            );
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                ccl_core::ensure_dir(parent)?;
            }
            let rendered = serde_yaml::to_string(&sweep)?;
            ccl_core::atomic_write_bytes(&out, rendered.as_bytes())?;
            println!("tests: {}", sweep.len());
            println!("wrote: {}", out.display());
        }
        Commands::Summarize { paths, out, json } => {
            let mut records = Vec::new();
            for path in &paths {
                records.extend(load_records(path)?);
            }
            let summaries = ccl_analysis::summarize(&records);
            if let Some(dir) = &out {
                ccl_core::ensure_dir(dir)?;
                ccl_analysis::write_summary_csv(&summaries, dir)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summarize",
                    "records": records.len(),
                    "groups": ccl_analysis::summary_to_json(&summaries),
                })));
            }
            print!("{}", ccl_analysis::summary_csv(&summaries));
        }
        Commands::Ingest { archives, db, json } => {
            let mut store = ccl_ingest::RunStore::open(&db)?;
            let report = ccl_ingest::ingest_batch(&mut store, &archives)?;
            if json {
                return Ok(Some(json!({
                    "ok": report.failed() == 0,
                    "command": "ingest",
                    "report": serde_json::to_value(&report)?,
                })));
            }
            for entry in &report.entries {
                match (&entry.summary, &entry.error) {
                    (Some(summary), _) => println!(
                        "{}: {} run `{}` ({} records, {} coverage files, {} env vars)",
                        entry.path.display(),
                        summary.kind,
                        summary.label,
                        summary.records,
                        summary.coverage_files,
                        summary.env_vars
                    ),
                    (None, Some(error)) => println!("{}: failed: {}", entry.path.display(), error),
                    (None, None) => {}
                }
            }
            println!("ingested: {}", report.succeeded());
            println!("failed: {}", report.failed());
        }
        Commands::IngestCoverage {
            file,
            label,
            db,
            json,
        } => {
            let label = match label {
                Some(label) => label,
                None => file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("cannot derive a run label from {}", file.display()))?,
            };
            let bytes = std::fs::read(&file)?;
            let mut store = ccl_ingest::RunStore::open(&db)?;
            let summary = ccl_ingest::ingest_coverage_json(&mut store, &bytes, &label)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "ingest-coverage",
                    "summary": serde_json::to_value(&summary)?,
                })));
            }
            println!("run: {}", summary.label);
            println!("coverage_files: {}", summary.coverage_files);
        }
        Commands::Runs { db, json } => {
            let store = ccl_ingest::RunStore::open(&db)?;
            let runs = store.list_runs()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "runs",
                    "runs": serde_json::to_value(&runs)?,
                })));
            }
            for run in &runs {
                let counts = store.row_counts(run.id)?;
                println!(
                    "{}\t{}\t{}\tbenchmark={} coverage={} env={}",
                    run.label,
                    run.kind,
                    run.timestamp,
                    counts.benchmark_records,
                    counts.coverage_records,
                    counts.env_vars
                );
            }
        }
        Commands::DeleteRun { label, db, json } => {
            let mut store = ccl_ingest::RunStore::open(&db)?;
            if !store.delete_run(&label)? {
                return Err(anyhow!("no run labelled `{}`", label));
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "delete-run",
                    "label": label,
                })));
            }
            println!("deleted: {}", label);
        }
        Commands::Compare { db, json } => {
            let store = ccl_ingest::RunStore::open(&db)?;
            let comparisons = ccl_ingest::compare_bundles(&store)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "compare",
                    "comparisons": serde_json::to_value(&comparisons)?,
                })));
            }
            for cmp in &comparisons {
                println!("[{}] {} ({})", cmp.bundle, cmp.collective, cmp.runs.join(", "));
                print!("{}", ccl_analysis::summary_csv(&cmp.groups));
            }
        }
        Commands::BestEnv {
            folders,
            db,
            metric,
            size_threshold,
            json,
        } => {
            let records = load_env_records(&folders, &db)?;
            let best = ccl_analysis::best_env(&records, &metric, size_threshold);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "best-env",
                    "metric": metric,
                    "best": serde_json::to_value(&best)?,
                })));
            }
            for b in &best {
                println!(
                    "{}\t{}\t{}\t{}/{}",
                    b.collective, b.datatype, b.env, b.wins, b.sizes
                );
            }
        }
        Commands::WrongRecords {
            folders,
            db,
            out_of_place_only,
            json,
        } => {
            let records = load_env_records(&folders, &db)?;
            let wrong = ccl_analysis::incorrect_records(&records, out_of_place_only);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "wrong-records",
                    "records": serde_json::to_value(&wrong)?,
                })));
            }
            for r in &wrong {
                let rec = &r.record;
                println!(
                    "{}\t{}\t{}\t{}\tsize={}\tin_place={}\twrong={}",
                    r.env,
                    rec.collective,
                    rec.datatype,
                    rec.redop,
                    rec.size.map(|s| s.to_string()).unwrap_or_default(),
                    rec.in_place.as_i64(),
                    rec.wrong
                );
            }
            println!("wrong: {}", wrong.len());
        }
    }
    Ok(None)
}

fn runner_options(
    results_root: PathBuf,
    env_mode: Option<EnvModeArg>,
    ranks: Option<u32>,
    direct: bool,
    timeout_secs: Option<u64>,
) -> ccl_runner::RunnerOptions {
    let mut launcher = if direct {
        ccl_runner::Launcher::Direct
    } else {
        ccl_runner::Launcher::default()
    };
    if let (ccl_runner::Launcher::Mpi { ranks: slot, .. }, Some(n)) = (&mut launcher, ranks) {
        *slot = n;
    }
    ccl_runner::RunnerOptions {
        launcher,
        injection: env_mode.map(Into::into).unwrap_or_default(),
        timeout: timeout_secs.map(Duration::from_secs),
        results_root,
    }
}

/// A directory is read as a run folder, anything else as one result file.
fn load_records(path: &Path) -> Result<Vec<ccl_analysis::ResultRecord>> {
    if path.is_dir() {
        Ok(ccl_analysis::load_run_folder(path)?.records)
    } else {
        ccl_analysis::load_result_records(path)
    }
}

/// Run folders when any are given, otherwise every benchmark run in the store.
fn load_env_records(folders: &[PathBuf], db: &Path) -> Result<Vec<ccl_analysis::EnvRecord>> {
    if folders.is_empty() {
        let store = ccl_ingest::RunStore::open(db)?;
        return Ok(ccl_ingest::attributed_records(&store)?);
    }
    let mut records = Vec::new();
    for folder in folders {
        records.extend(ccl_analysis::load_run_folder(folder)?.env_records());
    }
    Ok(records)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Summarize { json, .. }
        | Commands::Ingest { json, .. }
        | Commands::IngestCoverage { json, .. }
        | Commands::Runs { json, .. }
        | Commands::DeleteRun { json, .. }
        | Commands::Compare { json, .. }
        | Commands::BestEnv { json, .. }
        | Commands::WrongRecords { json, .. } => *json,
        Commands::Generate { .. } => false,
    }
}
