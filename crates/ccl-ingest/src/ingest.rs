//! Archive ingestion. Per archive: unpack into scratch, classify, recover env
//! vars, persist inside one transaction, release scratch on every path.

use crate::archive::{
    bundle_for, classify, collect_files, is_json, is_perf_result, recover_env_vars, relative_to,
    unpack,
};
use crate::coverage::parse_coverage_document;
use crate::error::{IngestError, IngestResult};
use crate::scratch::acquire_scratch;
use crate::store::{BenchmarkRow, CoverageRow, NewRun, RunKind, RunStore, StoreTx};
use ccl_analysis::{collective_from_filename, parse_records, ResultRecord};
use ccl_core::sha256_bytes;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: i64,
    pub label: String,
    pub kind: RunKind,
    pub records: usize,
    pub coverage_files: usize,
    pub env_vars: usize,
}

/// Label defaults to the archive's file stem.
pub fn ingest_archive(store: &mut RunStore, path: &Path) -> IngestResult<IngestSummary> {
    let label = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("uploaded_run")
        .to_string();
    let bytes = fs::read(path)?;
    ingest_archive_bytes(store, &bytes, &label)
}

pub fn ingest_archive_bytes(
    store: &mut RunStore,
    bytes: &[u8],
    label: &str,
) -> IngestResult<IngestSummary> {
    let scratch = acquire_scratch()?;
    let result = ingest_unpacked(store, bytes, label, scratch.path());
    if let Err(err) = scratch.release() {
        tracing::warn!(archive = label, error = %err, "failed to remove scratch directory");
    }
    match &result {
        Ok(summary) => tracing::info!(
            archive = label,
            kind = %summary.kind,
            records = summary.records,
            coverage_files = summary.coverage_files,
            env_vars = summary.env_vars,
            "ingested run"
        ),
        Err(err) => tracing::warn!(archive = label, error = %err, "ingestion rolled back"),
    }
    result
}

fn ingest_unpacked(
    store: &mut RunStore,
    bytes: &[u8],
    label: &str,
    scratch: &Path,
) -> IngestResult<IngestSummary> {
    unpack(Cursor::new(bytes), scratch)?;
    let files = collect_files(scratch)?;
    let kind = classify(&files);
    let env_vars = recover_env_vars(scratch, &files);

    if store.run_by_label(label)?.is_some() {
        return Err(IngestError::DuplicateLabel(label.to_string()));
    }

    let digest = sha256_bytes(bytes);
    let timestamp = Utc::now().to_rfc3339();
    let tx = store.begin()?;
    let run_id = tx.insert_run(&NewRun {
        label,
        kind,
        timestamp: &timestamp,
        source_digest: Some(&digest),
    })?;
    let mut env_var_count = 0;
    for (bundle, vars) in &env_vars {
        for (name, value) in vars {
            tx.insert_env_var(run_id, bundle, name, value)?;
            env_var_count += 1;
        }
    }

    let mut summary = IngestSummary {
        run_id,
        label: label.to_string(),
        kind,
        records: 0,
        coverage_files: 0,
        env_vars: env_var_count,
    };
    match kind {
        RunKind::Benchmark => {
            summary.records = ingest_benchmark_files(&tx, run_id, scratch, &files)?;
        }
        RunKind::Coverage => {
            let docs: Vec<&PathBuf> = files.iter().filter(|p| is_json(p)).collect();
            if docs.is_empty() {
                return Err(IngestError::fatal("archive contains no coverage document"));
            }
            for doc_path in docs {
                let bundle = bundle_for(relative_to(scratch, doc_path));
                summary.coverage_files +=
                    ingest_coverage_document(&tx, run_id, &fs::read(doc_path)?, &bundle)?;
            }
        }
    }
    tx.commit()?;
    Ok(summary)
}

fn ingest_benchmark_files(
    tx: &StoreTx<'_>,
    run_id: i64,
    root: &Path,
    files: &[PathBuf],
) -> IngestResult<usize> {
    let mut count = 0;
    for path in files.iter().filter(|p| is_perf_result(p)) {
        let collective = collective_from_filename(path);
        let env_bundle = bundle_for(relative_to(root, path));
        for raw in parse_records(&fs::read(path)?) {
            let record = ResultRecord::from_raw(&raw, collective.as_deref());
            tx.insert_benchmark_record(&BenchmarkRow {
                run_id,
                collective: record.collective,
                redop: record.redop,
                datatype: record.datatype,
                in_place: record.in_place,
                size: record.size,
                wrong: record.wrong,
                env_bundle: env_bundle.clone(),
                metrics: record.metrics,
            })?;
            count += 1;
        }
    }
    Ok(count)
}

/// Returns the number of per-file rows written.
fn ingest_coverage_document(
    tx: &StoreTx<'_>,
    run_id: i64,
    bytes: &[u8],
    env_bundle: &str,
) -> IngestResult<usize> {
    let doc = parse_coverage_document(bytes)?;
    for file in &doc.files {
        tx.insert_coverage_record(&CoverageRow {
            run_id,
            file: file.file.clone(),
            env_bundle: env_bundle.to_string(),
            summary: file.summary,
        })?;
    }
    tx.set_run_totals(run_id, &doc.totals)?;
    Ok(doc.files.len())
}

/// A bare coverage document, no archive around it.
pub fn ingest_coverage_json(
    store: &mut RunStore,
    bytes: &[u8],
    label: &str,
) -> IngestResult<IngestSummary> {
    if store.run_by_label(label)?.is_some() {
        return Err(IngestError::DuplicateLabel(label.to_string()));
    }
    let digest = sha256_bytes(bytes);
    let timestamp = Utc::now().to_rfc3339();
    let tx = store.begin()?;
    let run_id = tx.insert_run(&NewRun {
        label,
        kind: RunKind::Coverage,
        timestamp: &timestamp,
        source_digest: Some(&digest),
    })?;
    let coverage_files = ingest_coverage_document(&tx, run_id, bytes, label)?;
    tx.commit()?;
    Ok(IngestSummary {
        run_id,
        label: label.to_string(),
        kind: RunKind::Coverage,
        records: 0,
        coverage_files,
        env_vars: 0,
    })
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub summary: Option<IngestSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.summary.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

/// Ingests archives one after another. Per-archive failures are recorded and
/// the batch continues; a store failure ends the batch.
pub fn ingest_batch(store: &mut RunStore, paths: &[PathBuf]) -> IngestResult<BatchReport> {
    let mut report = BatchReport::default();
    for path in paths {
        match ingest_archive(store, path) {
            Ok(summary) => report.entries.push(BatchEntry {
                path: path.clone(),
                summary: Some(summary),
                error: None,
            }),
            Err(err) if err.is_store() => return Err(err),
            Err(err) => report.entries.push(BatchEntry {
                path: path.clone(),
                summary: None,
                error: Some(err.to_string()),
            }),
        }
    }
    Ok(report)
}
