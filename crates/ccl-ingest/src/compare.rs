use crate::bundle::{unify_bundles, EnvSet};
use crate::error::IngestResult;
use crate::store::{BenchmarkRow, RunKind, RunStore};
use ccl_analysis::{summarize, EnvRecord, GroupSummary, ResultRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleComparison {
    pub bundle: String,
    pub collective: String,
    /// Labels of the runs that contributed records.
    pub runs: Vec<String>,
    pub groups: Vec<GroupSummary>,
}

fn to_record(row: BenchmarkRow) -> ResultRecord {
    ResultRecord {
        collective: row.collective,
        datatype: row.datatype,
        redop: row.redop,
        in_place: row.in_place,
        size: row.size,
        wrong: row.wrong,
        metrics: row.metrics,
    }
}

/// Every benchmark record paired with the label of its run and the unified
/// key of its own env bundle, i.e. the env vars recorded for the row's
/// `env_bundle` within its run.
fn attribute(store: &RunStore) -> IngestResult<Vec<(String, EnvRecord)>> {
    let mut labels = Vec::new();
    let mut sets: Vec<EnvSet> = Vec::new();
    let mut rows = Vec::new();
    for run in store.list_runs()? {
        if run.kind != RunKind::Benchmark {
            continue;
        }
        let mut by_bundle: BTreeMap<String, EnvSet> = BTreeMap::new();
        for var in store.env_vars(run.id)? {
            by_bundle
                .entry(var.env_bundle)
                .or_default()
                .entry(var.name)
                .or_insert(var.value);
        }
        for row in store.benchmark_rows(Some(run.id))? {
            sets.push(by_bundle.get(&row.env_bundle).cloned().unwrap_or_default());
            labels.push(run.label.clone());
            rows.push(row);
        }
    }
    let keys = unify_bundles(&sets);
    Ok(labels
        .into_iter()
        .zip(keys)
        .zip(rows)
        .map(|((label, env), row)| {
            (
                label,
                EnvRecord {
                    env,
                    record: to_record(row),
                },
            )
        })
        .collect())
}

pub fn attributed_records(store: &RunStore) -> IngestResult<Vec<EnvRecord>> {
    Ok(attribute(store)?.into_iter().map(|(_, r)| r).collect())
}

/// Records grouped by (bundle key, collective) and averaged.
pub fn compare_bundles(store: &RunStore) -> IngestResult<Vec<BundleComparison>> {
    let mut grouped: BTreeMap<(String, String), (BTreeSet<String>, Vec<ResultRecord>)> =
        BTreeMap::new();
    for (label, tagged) in attribute(store)? {
        let slot = grouped
            .entry((tagged.env, tagged.record.collective.clone()))
            .or_default();
        slot.0.insert(label);
        slot.1.push(tagged.record);
    }

    Ok(grouped
        .into_iter()
        .map(|((bundle, collective), (labels, records))| BundleComparison {
            bundle,
            collective,
            runs: labels.into_iter().collect(),
            groups: summarize(&records),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_archive_bytes;
    use crate::store::NewRun;
    use ccl_analysis::InPlace;
    use std::io::{Cursor, Write};

    fn seed(store: &mut RunStore, label: &str, env: &[(&str, &str)], bus_bw: f64) {
        let tx = store.begin().expect("begin");
        let run_id = tx
            .insert_run(&NewRun {
                label,
                kind: RunKind::Benchmark,
                timestamp: "2026-01-01T00:00:00Z",
                source_digest: None,
            })
            .expect("run");
        for (name, value) in env {
            tx.insert_env_var(run_id, label, name, value).expect("env");
        }
        tx.insert_benchmark_record(&BenchmarkRow {
            run_id,
            collective: "all_reduce".into(),
            redop: "sum".into(),
            datatype: "float".into(),
            in_place: InPlace::No,
            size: Some(1024),
            wrong: "0".into(),
            env_bundle: label.into(),
            metrics: [("busBw".to_string(), bus_bw)].into_iter().collect(),
        })
        .expect("record");
        tx.commit().expect("commit");
    }

    #[test]
    fn runs_with_equivalent_overrides_share_a_bundle() {
        let mut store = RunStore::open_in_memory().expect("store");
        seed(&mut store, "tuned", &[("NCCL_MAX_CTAS", "8")], 10.0);
        seed(&mut store, "baseline", &[], 2.0);
        seed(&mut store, "explicit_default", &[("NCCL_MAX_CTAS", "default")], 4.0);

        let cmp = compare_bundles(&store).expect("compare");
        assert_eq!(cmp.len(), 2);
        assert_eq!(cmp[0].bundle, "NCCL_MAX_CTAS=8");
        assert_eq!(cmp[0].runs, vec!["tuned".to_string()]);
        assert_eq!(cmp[1].bundle, "NCCL_MAX_CTAS=unset");
        assert_eq!(
            cmp[1].runs,
            vec!["baseline".to_string(), "explicit_default".to_string()]
        );
        assert_eq!(cmp[1].groups.len(), 1);
        assert_eq!(cmp[1].groups[0].count, 2);
        assert_eq!(cmp[1].groups[0].means.get("busBw"), Some(&3.0));
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, body) in entries {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(body.as_bytes()).expect("write");
        }
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn bundles_inside_one_archive_are_compared_per_record() {
        let suite = "nccl_max_ctas_1:\n  ENV_VARS: [{id: NCCL_MAX_CTAS, value: 1}]\n\
                     nccl_max_ctas_8:\n  ENV_VARS: [{id: NCCL_MAX_CTAS, value: 8}]\n";
        let perf = |bus_bw: f64| {
            format!(
                "{{\"type\":\"float\",\"redop\":\"sum\",\"size\":4096,\"inPlace\":0,\"busBw\":{}}}\n",
                bus_bw
            )
        };
        let low = perf(1.0);
        let high = perf(9.0);
        let bytes = zip_bytes(&[
            ("s/nccl_max_ctas_1/ts/config.yaml", suite),
            ("s/nccl_max_ctas_1/ts/all_reduce_perf.json", &low),
            ("s/nccl_max_ctas_8/ts/config.yaml", suite),
            ("s/nccl_max_ctas_8/ts/all_reduce_perf.json", &high),
        ]);
        let mut store = RunStore::open_in_memory().expect("store");
        ingest_archive_bytes(&mut store, &bytes, "sweep").expect("ingest");

        let cmp = compare_bundles(&store).expect("compare");
        assert_eq!(cmp.len(), 2, "{cmp:?}");
        let means: Vec<(&str, Option<f64>)> = cmp
            .iter()
            .map(|c| (c.bundle.as_str(), c.groups[0].means.get("busBw").copied()))
            .collect();
        assert_eq!(
            means,
            vec![("NCCL_MAX_CTAS=1", Some(1.0)), ("NCCL_MAX_CTAS=8", Some(9.0))]
        );
        assert!(cmp.iter().all(|c| c.groups[0].count == 1));

        let tagged = attributed_records(&store).expect("records");
        assert_eq!(tagged.len(), 2);
        assert_ne!(tagged[0].env, tagged[1].env);
    }

    #[test]
    fn rows_of_a_bundle_without_env_vars_are_all_unset() {
        let mut store = RunStore::open_in_memory().expect("store");
        seed(&mut store, "tuned", &[("NCCL_MAX_CTAS", "8"), ("NCCL_MIN_CTAS", "2")], 1.0);
        seed(&mut store, "bare", &[], 1.0);
        let envs: Vec<String> = attributed_records(&store)
            .expect("records")
            .into_iter()
            .map(|r| r.env)
            .collect();
        assert_eq!(
            envs,
            vec![
                "NCCL_MAX_CTAS=8, NCCL_MIN_CTAS=2".to_string(),
                "NCCL_MAX_CTAS=unset, NCCL_MIN_CTAS=unset".to_string()
            ]
        );
    }

    #[test]
    fn empty_store_compares_to_nothing() {
        let store = RunStore::open_in_memory().expect("store");
        assert!(compare_bundles(&store).expect("compare").is_empty());
    }
}
