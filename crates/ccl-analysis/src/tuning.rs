use crate::record::{InPlace, ResultRecord};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_METRIC: &str = "busBw";
pub const DEFAULT_SIZE_THRESHOLD: u64 = 1024;

const CORRECT_MARKERS: &[&str] = &["0", "N/A"];

/// A result record and the environment it was measured under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvRecord {
    pub env: String,
    #[serde(flatten)]
    pub record: ResultRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestEnv {
    pub collective: String,
    pub datatype: String,
    pub env: String,
    /// Message sizes on which `env` scored highest.
    pub wins: usize,
    pub sizes: usize,
}

/// For every (collective, datatype): out-of-place records above
/// `size_threshold` bytes, the env with the highest `metric` per message
/// size, then the env that won the most sizes. Ties go to the env that
/// won the smallest size.
pub fn best_env(records: &[EnvRecord], metric: &str, size_threshold: u64) -> Vec<BestEnv> {
    let mut winners: BTreeMap<(&str, &str), BTreeMap<u64, (&str, f64)>> = BTreeMap::new();
    for r in records {
        let rec = &r.record;
        if rec.in_place != InPlace::No {
            continue;
        }
        let Some(size) = rec.size.filter(|s| *s > size_threshold) else {
            continue;
        };
        let Some(value) = rec.metric(metric).filter(|v| v.is_finite()) else {
            continue;
        };
        let per_size = winners
            .entry((rec.collective.as_str(), rec.datatype.as_str()))
            .or_default();
        match per_size.get(&size) {
            Some((_, best)) if *best >= value => {}
            _ => {
                per_size.insert(size, (r.env.as_str(), value));
            }
        }
    }

    winners
        .into_iter()
        .filter_map(|((collective, datatype), per_size)| {
            let sizes = per_size.len();
            let (env, wins) = most_frequent(per_size.values().map(|(env, _)| *env))?;
            Some(BestEnv {
                collective: collective.to_string(),
                datatype: datatype.to_string(),
                env: env.to_string(),
                wins,
                sizes,
            })
        })
        .collect()
}

fn most_frequent<'a>(items: impl Iterator<Item = &'a str>) -> Option<(&'a str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some(slot) => slot.1 += 1,
            None => counts.push((item, 1)),
        }
    }
    let max = counts.iter().map(|(_, n)| *n).max()?;
    counts.into_iter().find(|(_, n)| *n == max)
}

/// Records whose `wrong` count is anything but `0` or `N/A`, in input order.
pub fn incorrect_records(records: &[EnvRecord], out_of_place_only: bool) -> Vec<&EnvRecord> {
    records
        .iter()
        .filter(|r| !out_of_place_only || r.record.in_place == InPlace::No)
        .filter(|r| !CORRECT_MARKERS.contains(&r.record.wrong.trim()))
        .collect()
}
