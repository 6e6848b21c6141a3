use crate::parser::RawRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InPlace {
    No,
    Yes,
    Unknown,
}

impl InPlace {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => InPlace::Yes,
            Some(Value::Bool(false)) => InPlace::No,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(1) => InPlace::Yes,
                Some(0) => InPlace::No,
                _ => InPlace::Unknown,
            },
            Some(Value::String(s)) => match s.trim() {
                "1" | "true" => InPlace::Yes,
                "0" | "false" => InPlace::No,
                _ => InPlace::Unknown,
            },
            _ => InPlace::Unknown,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            InPlace::Yes => 1,
            InPlace::No => 0,
            InPlace::Unknown => -1,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => InPlace::Yes,
            0 => InPlace::No,
            _ => InPlace::Unknown,
        }
    }
}

impl fmt::Display for InPlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InPlace::Yes => "1",
            InPlace::No => "0",
            InPlace::Unknown => "unknown",
        })
    }
}

pub struct FieldDefault {
    pub field: &'static str,
    pub keys: &'static [&'static str],
    pub default: &'static str,
}

pub const COLLECTIVE: FieldDefault = FieldDefault {
    field: "collective",
    keys: &["name"],
    default: "unknown",
};
pub const DATATYPE: FieldDefault = FieldDefault {
    field: "datatype",
    keys: &["type"],
    default: "unknown",
};
pub const REDOP: FieldDefault = FieldDefault {
    field: "redop",
    keys: &["redop"],
    default: "no_reduction",
};
pub const WRONG: FieldDefault = FieldDefault {
    field: "wrong",
    keys: &["wrong"],
    default: "0",
};
pub const IN_PLACE: FieldDefault = FieldDefault {
    field: "in_place",
    keys: &["inPlace", "in_place"],
    default: "unknown",
};
pub const SIZE: FieldDefault = FieldDefault {
    field: "size",
    keys: &["size"],
    default: "",
};

/// Every identity field and how it is defaulted. Everything not listed here
/// that carries a number is a metric.
pub const FIELD_DEFAULTS: &[FieldDefault] = &[COLLECTIVE, DATATYPE, REDOP, WRONG, IN_PLACE, SIZE];

fn lookup<'a>(raw: &'a RawRecord, policy: &FieldDefault) -> Option<&'a Value> {
    policy
        .keys
        .iter()
        .find_map(|k| raw.get(*k))
        .filter(|v| !v.is_null())
}

fn text_or_default(raw: &RawRecord, policy: &FieldDefault) -> String {
    match lookup(raw, policy) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => policy.default.to_string(),
    }
}

fn is_identity_key(key: &str) -> bool {
    FIELD_DEFAULTS.iter().any(|p| p.keys.contains(&key))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub collective: String,
    pub datatype: String,
    pub redop: String,
    pub in_place: InPlace,
    pub size: Option<u64>,
    pub wrong: String,
    pub metrics: BTreeMap<String, f64>,
}

impl ResultRecord {
    /// Applies [`FIELD_DEFAULTS`]. `collective` (usually derived from the
    /// result filename) wins over the record's own `name`.
    pub fn from_raw(raw: &RawRecord, collective: Option<&str>) -> Self {
        let size = lookup(raw, &SIZE).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        });
        let metrics = raw
            .iter()
            .filter(|(k, _)| !is_identity_key(k))
            .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
            .collect();
        ResultRecord {
            collective: collective
                .map(str::to_string)
                .unwrap_or_else(|| text_or_default(raw, &COLLECTIVE)),
            datatype: text_or_default(raw, &DATATYPE),
            redop: text_or_default(raw, &REDOP),
            in_place: InPlace::from_value(lookup(raw, &IN_PLACE)),
            size,
            wrong: text_or_default(raw, &WRONG),
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

pub fn collective_from_filename(path: &std::path::Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.strip_suffix("_perf").unwrap_or(stem).to_string())
}
