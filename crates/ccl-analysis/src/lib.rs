pub mod aggregate;
pub mod parser;
pub mod record;
pub mod report;
pub mod run_folder;
pub mod tuning;

pub use aggregate::{summarize, GroupKey, GroupSummary};
pub use parser::{parse_content, parse_records, parse_result_file, Encoding, RawRecord};
pub use record::{collective_from_filename, InPlace, ResultRecord};
pub use report::{summary_csv, summary_to_json, write_summary_csv};
pub use run_folder::{load_run_folder, RunFolder};
pub use tuning::{best_env, incorrect_records, BestEnv, EnvRecord};

use anyhow::Result;
use std::path::Path;

/// Parses and normalizes one result file, tagging records with the
/// collective named by the file.
pub fn load_result_records(path: &Path) -> Result<Vec<ResultRecord>> {
    let collective = collective_from_filename(path);
    Ok(parse_result_file(path)?
        .iter()
        .map(|raw| ResultRecord::from_raw(raw, collective.as_deref()))
        .collect())
}
