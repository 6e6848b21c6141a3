use crate::config::TestDefinition;
use crate::error::ValidationError;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SuiteEntry {
    pub name: String,
    pub raw: Value,
}

impl SuiteEntry {
    pub fn validate(&self) -> Result<TestDefinition, ValidationError> {
        TestDefinition::validate(&self.raw)
    }
}

/// A parsed suite file. Entries keep file order and are validated one at a
/// time, so a bad test does not take down its neighbours.
#[derive(Debug, Clone)]
pub struct Suite {
    pub path: PathBuf,
    pub entries: Vec<SuiteEntry>,
}

impl Suite {
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("suite")
            .to_string()
    }
}

/// `"nightly"` -> `./configs/nightly.yaml`; anything that already looks like a
/// path is returned as-is.
pub fn resolve_config_path(config: &str) -> PathBuf {
    let direct = Path::new(config);
    if direct.exists() || config.contains(std::path::MAIN_SEPARATOR) {
        return direct.to_path_buf();
    }
    let name = if config.ends_with(".yaml") || config.ends_with(".yml") {
        config.to_string()
    } else {
        format!("{}.yaml", config)
    };
    PathBuf::from("configs").join(name)
}

pub fn load_suite(path: &Path) -> Result<Suite> {
    if !path.exists() {
        return Err(anyhow!("config file not found: {}", path.display()));
    }
    let raw_yaml = fs::read_to_string(path)?;
    let entries = parse_suite(&raw_yaml)?;
    Ok(Suite {
        path: path.to_path_buf(),
        entries,
    })
}

pub fn parse_suite(raw_yaml: &str) -> Result<Vec<SuiteEntry>> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(raw_yaml)?;
    let mapping = match yaml_value {
        serde_yaml::Value::Mapping(m) => m,
        _ => return Err(ValidationError::NotAMapping.into()),
    };
    let mut entries = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(s) => s,
            other => serde_yaml::to_string(&other)?.trim().to_string(),
        };
        let raw: Value = serde_json::to_value(value)?;
        entries.push(SuiteEntry { name, raw });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
zeta_test:
  collectives: [all_reduce]
  start_size: 1
  end_size: 16g
  iterations: 2
  operation: [sum]
  step_details: [{type: multiple, value: 2}]
  datatypes: [float]
alpha_test:
  collectives: [bogus]
  start_size: 1
  end_size: 8
  iterations: 1
  operation: [sum]
  datatypes: [float]
"#;

    #[test]
    fn entries_keep_file_order_and_validate_independently() {
        let entries = parse_suite(SUITE).expect("parse");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta_test", "alpha_test"]);
        assert!(entries[0].validate().is_ok());
        assert!(entries[1].validate().is_err());
    }

    #[test]
    fn non_mapping_top_level_is_rejected() {
        let err = parse_suite("- a\n- b\n").expect_err("list top-level");
        assert!(
            err.downcast_ref::<ValidationError>() == Some(&ValidationError::NotAMapping),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn bare_names_resolve_under_configs() {
        assert_eq!(
            resolve_config_path("nightly_sweep_does_not_exist"),
            PathBuf::from("configs").join("nightly_sweep_does_not_exist.yaml")
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_suite(&dir.path().join("nope.yaml")).expect_err("missing");
        assert!(err.to_string().contains("config file not found"));
    }
}
