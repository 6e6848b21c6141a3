use crate::record::{InPlace, ResultRecord};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub datatype: String,
    pub redop: String,
    pub size: Option<u64>,
    pub in_place: InPlace,
}

impl GroupKey {
    pub fn of(record: &ResultRecord) -> Self {
        GroupKey {
            datatype: record.datatype.clone(),
            redop: record.redop.clone(),
            size: record.size,
            in_place: record.in_place,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub count: usize,
    /// Mean of every metric present in at least one record of the group,
    /// taken over the records that carry it.
    pub means: BTreeMap<String, f64>,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sums: BTreeMap<String, (f64, usize)>,
}

pub fn summarize(records: &[ResultRecord]) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();
    for record in records {
        let acc = groups.entry(GroupKey::of(record)).or_default();
        acc.count += 1;
        for (name, value) in &record.metrics {
            if !value.is_finite() {
                continue;
            }
            let slot = acc.sums.entry(name.clone()).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }
    groups
        .into_iter()
        .map(|(key, acc)| GroupSummary {
            key,
            count: acc.count,
            means: acc
                .sums
                .into_iter()
                .map(|(name, (sum, n))| (name, sum / n as f64))
                .collect(),
        })
        .collect()
}

pub fn metric_names(summaries: &[GroupSummary]) -> Vec<String> {
    let mut names: Vec<String> = summaries
        .iter()
        .flat_map(|s| s.means.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    names
}
