//! SQLite store for ingested runs. Every row other than a run is owned by
//! its run and goes away with it.

use crate::coverage::{CoverageStat, CoverageSummary};
use crate::error::{IngestError, IngestResult};
use ccl_analysis::InPlace;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const INIT_SQL: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_label TEXT NOT NULL UNIQUE,
  measurement_type TEXT NOT NULL CHECK (measurement_type IN ('benchmark', 'coverage')),
  timestamp TEXT NOT NULL,
  source_digest TEXT,
  total_function_count INTEGER,
  total_function_covered INTEGER,
  total_function_percent REAL,
  total_line_count INTEGER,
  total_line_covered INTEGER,
  total_line_percent REAL,
  total_region_count INTEGER,
  total_region_covered INTEGER,
  total_region_percent REAL,
  total_branch_count INTEGER,
  total_branch_covered INTEGER,
  total_branch_percent REAL
);
CREATE INDEX IF NOT EXISTS idx_runs_measurement_type ON runs(measurement_type);

CREATE TABLE IF NOT EXISTS benchmark_records (
  id INTEGER PRIMARY KEY,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  collective TEXT NOT NULL,
  redop TEXT NOT NULL,
  datatype TEXT NOT NULL,
  in_place INTEGER NOT NULL,
  size INTEGER,
  size_gb REAL,
  wrong TEXT NOT NULL,
  env_bundle TEXT NOT NULL,
  metrics TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_benchmark_records_run_id ON benchmark_records(run_id);

CREATE TABLE IF NOT EXISTS coverage_records (
  id INTEGER PRIMARY KEY,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  file TEXT NOT NULL,
  env_bundle TEXT NOT NULL,
  function_count INTEGER NOT NULL,
  function_covered INTEGER NOT NULL,
  function_cov REAL NOT NULL,
  line_count INTEGER NOT NULL,
  line_covered INTEGER NOT NULL,
  line_cov REAL NOT NULL,
  region_count INTEGER NOT NULL,
  region_covered INTEGER NOT NULL,
  region_cov REAL NOT NULL,
  branch_count INTEGER NOT NULL,
  branch_covered INTEGER NOT NULL,
  branch_cov REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_coverage_records_run_id ON coverage_records(run_id);

CREATE TABLE IF NOT EXISTS env_vars (
  id INTEGER PRIMARY KEY,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  env_bundle TEXT NOT NULL,
  name TEXT NOT NULL,
  value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_env_vars_run_bundle ON env_vars(run_id, env_bundle);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Benchmark,
    Coverage,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Benchmark => "benchmark",
            RunKind::Coverage => "coverage",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "benchmark" => Ok(RunKind::Benchmark),
            "coverage" => Ok(RunKind::Coverage),
            other => Err(format!("unknown measurement type `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub id: i64,
    pub label: String,
    pub kind: RunKind,
    pub timestamp: String,
    pub source_digest: Option<String>,
    /// Present once a coverage run has had its totals applied.
    pub totals: Option<CoverageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRow {
    pub run_id: i64,
    pub collective: String,
    pub redop: String,
    pub datatype: String,
    pub in_place: InPlace,
    pub size: Option<u64>,
    pub wrong: String,
    pub env_bundle: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub run_id: i64,
    pub file: String,
    pub env_bundle: String,
    pub summary: CoverageSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVarRow {
    pub run_id: i64,
    pub env_bundle: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub benchmark_records: usize,
    pub coverage_records: usize,
    pub env_vars: usize,
}

const GIB: f64 = (1u64 << 30) as f64;

pub struct RunStore {
    conn: Connection,
}

impl fmt::Debug for RunStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStore").finish_non_exhaustive()
    }
}

impl RunStore {
    pub fn open(path: &Path) -> IngestResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> IngestResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> IngestResult<Self> {
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { conn })
    }

    /// Everything written through the returned handle lands atomically on
    /// [`StoreTx::commit`]; dropping it rolls back.
    pub fn begin(&mut self) -> IngestResult<StoreTx<'_>> {
        Ok(StoreTx {
            tx: self.conn.transaction()?,
        })
    }

    pub fn list_runs(&self) -> IngestResult<Vec<RunRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM runs ORDER BY id", RUN_COLUMNS))?;
        let rows = stmt.query_map([], run_from_row)?;
        collect_rows(rows)
    }

    pub fn run_by_label(&self, label: &str) -> IngestResult<Option<RunRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE run_label = ?1", RUN_COLUMNS),
                params![label],
                run_from_row,
            )
            .optional()?
            .transpose()?)
    }

    pub fn benchmark_rows(&self, run_id: Option<i64>) -> IngestResult<Vec<BenchmarkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, collective, redop, datatype, in_place, size, wrong, env_bundle, metrics
             FROM benchmark_records
             WHERE ?1 IS NULL OR run_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let metrics_json: String = row.get(8)?;
            let size: Option<i64> = row.get(5)?;
            Ok((
                BenchmarkRow {
                    run_id: row.get(0)?,
                    collective: row.get(1)?,
                    redop: row.get(2)?,
                    datatype: row.get(3)?,
                    in_place: InPlace::from_i64(row.get(4)?),
                    size: size.map(|s| s as u64),
                    wrong: row.get(6)?,
                    env_bundle: row.get(7)?,
                    metrics: BTreeMap::new(),
                },
                metrics_json,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (mut record, metrics_json) = row?;
            record.metrics = serde_json::from_str(&metrics_json)?;
            out.push(record);
        }
        Ok(out)
    }

    pub fn coverage_rows(&self, run_id: i64) -> IngestResult<Vec<CoverageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, file, env_bundle,
                    function_count, function_covered, function_cov,
                    line_count, line_covered, line_cov,
                    region_count, region_covered, region_cov,
                    branch_count, branch_covered, branch_cov
             FROM coverage_records WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(CoverageRow {
                run_id: row.get(0)?,
                file: row.get(1)?,
                env_bundle: row.get(2)?,
                summary: CoverageSummary {
                    function: stat_at(row, 3)?,
                    line: stat_at(row, 6)?,
                    region: stat_at(row, 9)?,
                    branch: stat_at(row, 12)?,
                },
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn env_vars(&self, run_id: i64) -> IngestResult<Vec<EnvVarRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, env_bundle, name, value FROM env_vars WHERE run_id = ?1 ORDER BY id",
            )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(EnvVarRow {
                run_id: row.get(0)?,
                env_bundle: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn row_counts(&self, run_id: i64) -> IngestResult<RowCounts> {
        let count = |table: &str| -> IngestResult<usize> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE run_id = ?1", table),
                params![run_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };
        Ok(RowCounts {
            benchmark_records: count("benchmark_records")?,
            coverage_records: count("coverage_records")?,
            env_vars: count("env_vars")?,
        })
    }

    pub fn delete_run(&mut self, label: &str) -> IngestResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM runs WHERE run_label = ?1", params![label])?;
        Ok(n > 0)
    }
}

pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

pub struct NewRun<'a> {
    pub label: &'a str,
    pub kind: RunKind,
    pub timestamp: &'a str,
    pub source_digest: Option<&'a str>,
}

impl StoreTx<'_> {
    pub fn insert_run(&self, run: &NewRun<'_>) -> IngestResult<i64> {
        self.tx.execute(
            "INSERT INTO runs (run_label, measurement_type, timestamp, source_digest)
             VALUES (?1, ?2, ?3, ?4)",
            params![run.label, run.kind.as_str(), run.timestamp, run.source_digest],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn insert_env_var(
        &self,
        run_id: i64,
        env_bundle: &str,
        name: &str,
        value: &str,
    ) -> IngestResult<()> {
        self.tx.execute(
            "INSERT INTO env_vars (run_id, env_bundle, name, value) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, env_bundle, name, value],
        )?;
        Ok(())
    }

    pub fn insert_benchmark_record(&self, row: &BenchmarkRow) -> IngestResult<()> {
        let metrics = serde_json::to_string(&row.metrics)?;
        self.tx.execute(
            "INSERT INTO benchmark_records
               (run_id, collective, redop, datatype, in_place, size, size_gb, wrong, env_bundle, metrics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.run_id,
                row.collective,
                row.redop,
                row.datatype,
                row.in_place.as_i64(),
                row.size.map(|s| s as i64),
                row.size.map(|s| s as f64 / GIB),
                row.wrong,
                row.env_bundle,
                metrics,
            ],
        )?;
        Ok(())
    }

    pub fn insert_coverage_record(&self, row: &CoverageRow) -> IngestResult<()> {
        let s = &row.summary;
        self.tx.execute(
            "INSERT INTO coverage_records
               (run_id, file, env_bundle,
                function_count, function_covered, function_cov,
                line_count, line_covered, line_cov,
                region_count, region_covered, region_cov,
                branch_count, branch_covered, branch_cov)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                row.run_id,
                row.file,
                row.env_bundle,
                s.function.count,
                s.function.covered,
                s.function.percent,
                s.line.count,
                s.line.covered,
                s.line.percent,
                s.region.count,
                s.region.covered,
                s.region.percent,
                s.branch.count,
                s.branch.covered,
                s.branch.percent,
            ],
        )?;
        Ok(())
    }

    pub fn set_run_totals(&self, run_id: i64, totals: &CoverageSummary) -> IngestResult<()> {
        self.tx.execute(
            "UPDATE runs SET
               total_function_count = ?2, total_function_covered = ?3, total_function_percent = ?4,
               total_line_count = ?5, total_line_covered = ?6, total_line_percent = ?7,
               total_region_count = ?8, total_region_covered = ?9, total_region_percent = ?10,
               total_branch_count = ?11, total_branch_covered = ?12, total_branch_percent = ?13
             WHERE id = ?1",
            params![
                run_id,
                totals.function.count,
                totals.function.covered,
                totals.function.percent,
                totals.line.count,
                totals.line.covered,
                totals.line.percent,
                totals.region.count,
                totals.region.covered,
                totals.region.percent,
                totals.branch.count,
                totals.branch.covered,
                totals.branch.percent,
            ],
        )?;
        Ok(())
    }

    pub fn commit(self) -> IngestResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

const RUN_COLUMNS: &str = "id, run_label, measurement_type, timestamp, source_digest,
  total_function_count, total_function_covered, total_function_percent,
  total_line_count, total_line_covered, total_line_percent,
  total_region_count, total_region_covered, total_region_percent,
  total_branch_count, total_branch_covered, total_branch_percent";

/// Inner result carries measurement-type decode failures out of rusqlite's
/// row mapper.
fn run_from_row(row: &Row<'_>) -> rusqlite::Result<IngestResult<RunRow>> {
    let kind_raw: String = row.get(2)?;
    let total_function_count: Option<i64> = row.get(5)?;
    let totals = match total_function_count {
        Some(_) => Some(CoverageSummary {
            function: stat_at(row, 5)?,
            line: stat_at(row, 8)?,
            region: stat_at(row, 11)?,
            branch: stat_at(row, 14)?,
        }),
        None => None,
    };
    let run = RunRow {
        id: row.get(0)?,
        label: row.get(1)?,
        kind: RunKind::Benchmark,
        timestamp: row.get(3)?,
        source_digest: row.get(4)?,
        totals,
    };
    Ok(kind_raw
        .parse::<RunKind>()
        .map(|kind| RunRow { kind, ..run })
        .map_err(IngestError::fatal))
}

fn collect_rows<I>(rows: I) -> IngestResult<Vec<RunRow>>
where
    I: Iterator<Item = rusqlite::Result<IngestResult<RunRow>>>,
{
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn stat_at(row: &Row<'_>, start: usize) -> rusqlite::Result<CoverageStat> {
    Ok(CoverageStat {
        count: row.get::<_, Option<i64>>(start)?.unwrap_or(0),
        covered: row.get::<_, Option<i64>>(start + 1)?.unwrap_or(0),
        percent: row.get::<_, Option<f64>>(start + 2)?.unwrap_or(0.0),
    })
}
