//! Loads a finished sweep directory (`config.yaml` + `*_perf.json`) for
//! side-by-side comparison without going through the store.

use crate::parser::parse_result_file;
use crate::record::{collective_from_filename, ResultRecord};
use crate::tuning::EnvRecord;
use anyhow::Result;
use ccl_core::config::scalar_to_string;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

pub const UNKNOWN_ENV: &str = "unknown";

#[derive(Debug, Clone, Serialize)]
pub struct RunFolder {
    pub label: String,
    pub env_config: String,
    pub records: Vec<ResultRecord>,
}

impl RunFolder {
    /// Records attributed to the folder's env description, or to the folder
    /// name when the description is unknown.
    pub fn env_records(&self) -> Vec<EnvRecord> {
        let env = if self.env_config == UNKNOWN_ENV {
            &self.label
        } else {
            &self.env_config
        };
        self.records
            .iter()
            .map(|record| EnvRecord {
                env: env.clone(),
                record: record.clone(),
            })
            .collect()
    }
}

/// `NAME=value, NAME=value` from the first block of a config snapshot whose
/// name is in `preferred`, else from its first block. Accepts both
/// `{id, value}` entries and `{NAME: {value}}` entries.
pub fn env_description(config_yaml: &str, preferred: &[&str]) -> Result<Option<String>> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(config_yaml)?;
    let Some(mapping) = yaml.as_mapping() else {
        return Ok(None);
    };
    let chosen = preferred
        .iter()
        .find_map(|name| mapping.get(*name))
        .or_else(|| mapping.iter().next().map(|(_, v)| v));
    let block: Value = match chosen {
        Some(block) => serde_json::to_value(block)?,
        None => return Ok(None),
    };
    let Some(env_list) = block.get("ENV_VARS").and_then(|v| v.as_array()) else {
        return Ok(None);
    };
    let mut items = Vec::new();
    for var in env_list {
        let Some(obj) = var.as_object() else { continue };
        if let Some(id) = obj.get("id").and_then(|v| v.as_str()) {
            let value = obj.get("value").and_then(scalar_to_string).unwrap_or_default();
            items.push(format!("{}={}", id, value));
            continue;
        }
        for (name, inner) in obj {
            let value = inner
                .get("value")
                .and_then(scalar_to_string)
                .unwrap_or_default();
            items.push(format!("{}={}", name, value));
        }
    }
    Ok(if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    })
}

pub fn load_run_folder(run_folder: &Path) -> Result<RunFolder> {
    let label = run_folder
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("run")
        .to_string();

    // `<test>/<timestamp>/config.yaml` holds the whole suite; the test's
    // block is named after the folder or its parent.
    let parent_name = run_folder
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let preferred = [label.as_str(), parent_name];

    let mut env_config = UNKNOWN_ENV.to_string();
    let config_path = run_folder.join("config.yaml");
    if config_path.exists() {
        match fs::read_to_string(&config_path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| env_description(&raw, &preferred))
        {
            Ok(Some(desc)) => env_config = desc,
            Ok(None) => {}
            Err(err) => tracing::warn!(
                folder = %run_folder.display(),
                error = %err,
                "could not parse config.yaml"
            ),
        }
    }

    let mut perf_files: Vec<_> = fs::read_dir(run_folder)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_perf.json"))
        })
        .collect();
    perf_files.sort();

    let mut records = Vec::new();
    for path in perf_files {
        let collective = collective_from_filename(&path);
        for raw in parse_result_file(&path)? {
            records.push(ResultRecord::from_raw(&raw, collective.as_deref()));
        }
    }

    Ok(RunFolder {
        label,
        env_config,
        records,
    })
}
