//! Comparable bundle keys for runs that each set a different subset of
//! environment variables.

use ccl_core::bundle::{is_unset_value, UNSET};
use std::collections::{BTreeMap, BTreeSet};

pub type EnvSet = BTreeMap<String, String>;

pub fn all_names(sets: &[EnvSet]) -> BTreeSet<String> {
    sets.iter().flat_map(|s| s.keys().cloned()).collect()
}

/// `NAME=value, NAME=value` over every name in `names`, sorted, with
/// absent, `0` and `default` values rendered as `unset`.
pub fn bundle_key(vars: &EnvSet, names: &BTreeSet<String>) -> String {
    names
        .iter()
        .map(|name| {
            let value = vars
                .get(name)
                .map(String::as_str)
                .filter(|v| !is_unset_value(v))
                .unwrap_or(UNSET);
            format!("{}={}", name, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One key per input set, all built against the union of names.
pub fn unify_bundles(sets: &[EnvSet]) -> Vec<String> {
    let names = all_names(sets);
    sets.iter().map(|s| bundle_key(s, &names)).collect()
}
