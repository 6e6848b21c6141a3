//! Unpacking and classifying archived runs.

use crate::error::IngestResult;
use crate::store::RunKind;
use ccl_core::config::scalar_to_string;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const PERF_SUFFIX: &str = "_perf.json";
pub const UNKNOWN_BUNDLE: &str = "unknown";

/// Extracts every regular file, refusing entries that would escape `dest`.
/// Returns the number of files written.
pub fn unpack<R: Read + Seek>(reader: R, dest: &Path) -> IngestResult<usize> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = entry.name(), "skipping archive entry outside extraction root");
            continue;
        };
        if rel
            .components()
            .any(|c| matches!(c, Component::Normal(n) if n == "__MACOSX"))
        {
            continue;
        }
        let out_path = dest.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

/// Regular files under `root`, sorted for stable ingestion order.
pub fn collect_files(root: &Path) -> IngestResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

pub fn is_perf_result(path: &Path) -> bool {
    let name = file_name(path);
    name.ends_with(PERF_SUFFIX) && name.len() > PERF_SUFFIX.len()
}

pub fn is_json(path: &Path) -> bool {
    file_name(path).ends_with(".json")
}

pub fn is_config_snapshot(path: &Path) -> bool {
    let name = file_name(path);
    name.ends_with(".yaml") || name.ends_with(".yml")
}

pub fn classify(files: &[PathBuf]) -> RunKind {
    if files.iter().any(|f| is_perf_result(f)) {
        RunKind::Benchmark
    } else {
        RunKind::Coverage
    }
}

/// Attribution key of a result file: the name of its parent's parent,
/// i.e. the test directory in `<test>/<timestamp>/<collective>_perf.json`.
pub fn bundle_for(path: &Path) -> String {
    path.parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or(UNKNOWN_BUNDLE)
        .to_string()
}

pub fn relative_to<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

pub type BundleEnvVars = BTreeMap<String, Vec<(String, String)>>;

/// Env overrides per bundle. A snapshot at `<bundle>/<ts>/config.yaml` is a
/// copy of the whole suite, so only the block named after its bundle applies;
/// a single-block snapshot applies whatever its block is called. Within a
/// bundle the first value seen for a name wins.
pub fn recover_env_vars(root: &Path, files: &[PathBuf]) -> BundleEnvVars {
    let mut out = BundleEnvVars::new();
    for path in files.iter().filter(|p| is_config_snapshot(p)) {
        let bundle = bundle_for(relative_to(root, path));
        let parsed = fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|raw| {
            serde_yaml::from_str::<serde_yaml::Value>(&raw).map_err(|e| e.to_string())
        });
        let yaml = match parsed {
            Ok(v) => v,
            Err(error) => {
                tracing::warn!(
                    snapshot = %path.display(),
                    %error,
                    "skipping unparseable config snapshot"
                );
                continue;
            }
        };
        let Some(mapping) = yaml.as_mapping() else {
            continue;
        };
        let block = match mapping.get(bundle.as_str()) {
            Some(block) => block,
            None if mapping.len() == 1 => match mapping.iter().next() {
                Some((_, block)) => block,
                None => continue,
            },
            None => {
                tracing::warn!(
                    snapshot = %path.display(),
                    bundle = %bundle,
                    "config snapshot has no block for its bundle"
                );
                continue;
            }
        };
        let Ok(block) = serde_json::to_value(block) else {
            continue;
        };
        let Some(entries) = block.get("ENV_VARS").and_then(|v| v.as_array()) else {
            continue;
        };
        let vars = out.entry(bundle).or_default();
        for entry in entries {
            let name = entry
                .get("id")
                .or_else(|| entry.get("name"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty());
            let value = entry.get("value").and_then(scalar_to_string);
            if let (Some(name), Some(value)) = (name, value) {
                if !vars.iter().any(|(n, _)| n == name) {
                    vars.push((name.to_string(), value));
                }
            }
        }
    }
    out
}
