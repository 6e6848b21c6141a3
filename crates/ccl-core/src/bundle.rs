use crate::config::{EnvOverride, DEFAULT_ENV_VALUE};
use serde::Serialize;
use std::collections::BTreeMap;

pub const UNSET: &str = "unset";

/// True for values that mean "not set" when bundles from different sources
/// are compared.
pub fn is_unset_value(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == DEFAULT_ENV_VALUE || v == "0" || v == UNSET
}

/// Ordered name -> value overrides. Later entries for the same name replace
/// earlier ones in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvBundle {
    entries: Vec<(String, String)>,
}

impl EnvBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_overrides(overrides: &[EnvOverride]) -> Self {
        let mut bundle = Self::new();
        for o in overrides {
            bundle.set(&o.name, &o.value);
        }
        bundle
    }

    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn active(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(_, v)| *v != DEFAULT_ENV_VALUE)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted view with `default`/`0` folded into [`UNSET`].
    pub fn normalized(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(n, v)| {
                let value = if is_unset_value(v) { UNSET } else { v };
                (n.to_string(), value.to_string())
            })
            .collect()
    }
}

impl PartialEq for EnvBundle {
    fn eq(&self, other: &Self) -> bool {
        let mine: BTreeMap<&str, &str> = self.iter().collect();
        let theirs: BTreeMap<&str, &str> = other.iter().collect();
        mine == theirs
    }
}

impl Eq for EnvBundle {}
