use crate::aggregate::{metric_names, GroupSummary};
use anyhow::Result;
use ccl_core::atomic_write_bytes;
use serde_json::{json, Value};
use std::path::Path;

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn summary_csv(summaries: &[GroupSummary]) -> String {
    let metrics = metric_names(summaries);
    let mut header = vec![
        "type".to_string(),
        "redop".to_string(),
        "size".to_string(),
        "inPlace".to_string(),
        "count".to_string(),
    ];
    header.extend(metrics.iter().map(|m| format!("{}_avg", m)));

    let mut out = header
        .iter()
        .map(|h| csv_field(h))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for s in summaries {
        let mut row = vec![
            csv_field(&s.key.datatype),
            csv_field(&s.key.redop),
            s.key.size.map(|v| v.to_string()).unwrap_or_default(),
            s.key.in_place.to_string(),
            s.count.to_string(),
        ];
        row.extend(
            metrics
                .iter()
                .map(|m| s.means.get(m).map(|v| v.to_string()).unwrap_or_default()),
        );
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Writes `results.csv` into `dir`. Returns `false` (and writes nothing)
/// when there is nothing to summarize.
pub fn write_summary_csv(summaries: &[GroupSummary], dir: &Path) -> Result<bool> {
    if summaries.is_empty() {
        return Ok(false);
    }
    atomic_write_bytes(&dir.join("results.csv"), summary_csv(summaries).as_bytes())?;
    Ok(true)
}

pub fn summary_to_json(summaries: &[GroupSummary]) -> Value {
    json!({
        "groups": summaries.len(),
        "metrics": metric_names(summaries),
        "summary": summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::summarize;
    use crate::record::{InPlace, ResultRecord};

    fn rec(redop: &str, time: f64) -> ResultRecord {
        ResultRecord {
            collective: "reduce".into(),
            datatype: "float".into(),
            redop: redop.into(),
            in_place: InPlace::Unknown,
            size: Some(64),
            wrong: "0".into(),
            metrics: [("time".to_string(), time)].into_iter().collect(),
        }
    }

    #[test]
    fn csv_has_header_and_one_row_per_group() {
        let csv = summary_csv(&summarize(&[rec("sum", 2.0), rec("max", 4.0)]));
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "type,redop,size,inPlace,count,time_avg");
        assert_eq!(lines[1], "float,max,64,unknown,1,4");
        assert_eq!(lines[2], "float,sum,64,unknown,1,2");
    }

    #[test]
    fn empty_summary_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!write_summary_csv(&[], dir.path()).expect("write"));
        assert!(!dir.path().join("results.csv").exists());
    }
}
