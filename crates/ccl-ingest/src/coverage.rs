//! llvm-cov style export documents: `data[0].files[].summary` per file and
//! `data[0].totals` for the whole run.

use crate::error::{IngestError, IngestResult};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoverageStat {
    pub count: i64,
    pub covered: i64,
    pub percent: f64,
}

impl CoverageStat {
    fn from_value(value: Option<&Value>) -> Self {
        let Some(obj) = value.and_then(|v| v.as_object()) else {
            return Self::default();
        };
        let int = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                .unwrap_or(0)
        };
        Self {
            count: int("count"),
            covered: int("covered"),
            percent: obj.get("percent").and_then(|v| v.as_f64()).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub function: CoverageStat,
    pub line: CoverageStat,
    pub region: CoverageStat,
    pub branch: CoverageStat,
}

impl CoverageSummary {
    pub fn from_value(value: &Value) -> Self {
        Self {
            function: CoverageStat::from_value(value.get("functions")),
            line: CoverageStat::from_value(value.get("lines")),
            region: CoverageStat::from_value(value.get("regions")),
            branch: CoverageStat::from_value(value.get("branches")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileCoverage {
    pub file: String,
    pub summary: CoverageSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageDocument {
    pub files: Vec<FileCoverage>,
    pub totals: CoverageSummary,
}

pub const UNKNOWN_FILE: &str = "<unknown>";

/// Missing `data` or `totals` is fatal for the archive the document came from.
pub fn parse_coverage_document(bytes: &[u8]) -> IngestResult<CoverageDocument> {
    let doc: Value = serde_json::from_slice(bytes)
        .map_err(|e| IngestError::fatal(format!("coverage JSON is not valid: {}", e)))?;
    let item = doc
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| IngestError::fatal("No 'data' array in coverage JSON"))?;

    let files = item
        .get("files")
        .and_then(|f| f.as_array())
        .map(|files| {
            files
                .iter()
                .map(|f| FileCoverage {
                    file: f
                        .get("filename")
                        .or_else(|| f.get("fileName"))
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .unwrap_or(UNKNOWN_FILE)
                        .to_string(),
                    summary: f
                        .get("summary")
                        .map(CoverageSummary::from_value)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let totals = item
        .get("totals")
        .filter(|t| !t.is_null())
        .map(CoverageSummary::from_value)
        .ok_or_else(|| IngestError::fatal("No 'totals' block in coverage JSON"))?;

    Ok(CoverageDocument { files, totals })
}
