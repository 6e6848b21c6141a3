use crate::error::ValidationError;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const ALL: &str = "all";

pub const COLLECTIVES: &[&str] = &[
    "all_gather",
    "all_reduce",
    "alltoall",
    "alltoallv",
    "scatter",
    "broadcast",
    "gather",
    "reduce",
    "reduce_scatter",
    "sendrecv",
];

pub const REDUCTION_OPS: &[&str] = &["sum", "prod", "min", "max", "avg", "mulsum"];

pub const DATATYPES: &[&str] = &[
    "int8", "uint8", "int32", "uint32", "int64", "uint64", "half", "float", "double", "bfloat16",
    "fp8_e4m3", "fp8_e5m2",
];

pub const DEFAULT_ENV_VALUE: &str = "default";

/// A message size: either a plain byte count or a literal that already
/// carries its unit (`"16g"`, `"512KB"`), passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    Bytes(u64),
    Literal { text: String, bytes: u64 },
}

impl SizeSpec {
    fn from_value(field: &'static str, value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::Number(n) => {
                if let Some(bytes) = n.as_u64() {
                    Ok(SizeSpec::Bytes(bytes))
                } else if let Some(neg) = n.as_i64() {
                    Err(ValidationError::NegativeSize { field, value: neg })
                } else {
                    Err(ValidationError::InvalidSize {
                        field,
                        value: n.to_string(),
                    })
                }
            }
            Value::String(s) => {
                let bytes = parse_size_literal(s).ok_or_else(|| ValidationError::InvalidSize {
                    field,
                    value: s.clone(),
                })?;
                Ok(SizeSpec::Literal {
                    text: s.trim().to_string(),
                    bytes,
                })
            }
            _ => Err(ValidationError::WrongType {
                field,
                expected: "an integer or a size string",
            }),
        }
    }

    pub fn to_bytes(&self) -> u64 {
        match self {
            SizeSpec::Bytes(b) => *b,
            SizeSpec::Literal { bytes, .. } => *bytes,
        }
    }

    pub fn as_arg(&self) -> String {
        match self {
            SizeSpec::Bytes(b) => b.to_string(),
            SizeSpec::Literal { text, .. } => text.clone(),
        }
    }
}

impl Serialize for SizeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SizeSpec::Bytes(b) => serializer.serialize_u64(*b),
            SizeSpec::Literal { text, .. } => serializer.serialize_str(text),
        }
    }
}

/// `"16g"`, `"16GB"`, `"512k"`, `"1024"`; binary multiples.
pub fn parse_size_literal(raw: &str) -> Option<u64> {
    let s = raw.trim().to_ascii_lowercase();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return None;
    }
    let count: u64 = s[..digits_end].parse().ok()?;
    let multiplier: u64 = match &s[digits_end..] {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return None,
    };
    count.checked_mul(multiplier)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Multiple,
    Increment,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Multiple => "multiple",
            StepKind::Increment => "increment",
        }
    }
}

impl FromStr for StepKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple" => Ok(StepKind::Multiple),
            "increment" => Ok(StepKind::Increment),
            other => Err(ValidationError::InvalidStepKind(other.to_string())),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRule {
    pub kind: StepKind,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvOverride {
    pub name: String,
    pub value: String,
}

impl EnvOverride {
    pub fn is_default(&self) -> bool {
        self.value == DEFAULT_ENV_VALUE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestDefinition {
    collectives: Vec<String>,
    start_size: SizeSpec,
    end_size: SizeSpec,
    iterations: u64,
    operations: Vec<String>,
    step: Option<StepRule>,
    datatypes: Vec<String>,
    env_vars: Vec<EnvOverride>,
    gpus_per_thread: u64,
}

impl TestDefinition {
    pub fn validate(raw: &Value) -> Result<Self, ValidationError> {
        let map = raw
            .as_object()
            .ok_or(ValidationError::DefinitionNotAMapping)?;
        let field = |name: &'static str| map.get(name).ok_or(ValidationError::MissingField(name));

        let collectives = string_list("collectives", field("collectives")?)?;
        for c in &collectives {
            check_vocabulary("collective", c, COLLECTIVES)?;
        }
        let datatypes = string_list("datatypes", field("datatypes")?)?;
        for d in &datatypes {
            check_vocabulary("datatype", d, DATATYPES)?;
        }
        let operations = string_list("operation", field("operation")?)?;
        for op in &operations {
            check_vocabulary("reduction operation", op, REDUCTION_OPS)?;
        }

        let start_size = SizeSpec::from_value("start_size", field("start_size")?)?;
        let end_size = SizeSpec::from_value("end_size", field("end_size")?)?;
        let iterations = positive_int("iterations", field("iterations")?)?;
        let gpus_per_thread = match map.get("gpus_per_thread") {
            None | Some(Value::Null) => 1,
            Some(v) => positive_int("gpus_per_thread", v)?,
        };

        let step = parse_step(map.get("step_details"), map.get("step_detail"))?;

        let env_vars = match map.get("ENV_VARS") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(index, entry)| parse_env_entry(index, entry))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ValidationError::WrongType {
                    field: "ENV_VARS",
                    expected: "a list",
                })
            }
        };

        Ok(TestDefinition {
            collectives,
            start_size,
            end_size,
            iterations,
            operations,
            step,
            datatypes,
            env_vars,
            gpus_per_thread,
        })
    }

    pub fn collectives(&self) -> &[String] {
        &self.collectives
    }

    pub fn resolved_collectives(&self) -> Vec<String> {
        if self.collectives.iter().any(|c| c == ALL) {
            return COLLECTIVES.iter().map(|c| c.to_string()).collect();
        }
        let mut out: Vec<String> = Vec::with_capacity(self.collectives.len());
        for c in &self.collectives {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        out
    }

    pub fn start_size(&self) -> &SizeSpec {
        &self.start_size
    }

    pub fn end_size(&self) -> &SizeSpec {
        &self.end_size
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn step(&self) -> Option<StepRule> {
        self.step
    }

    pub fn datatypes(&self) -> &[String] {
        &self.datatypes
    }

    pub fn env_vars(&self) -> &[EnvOverride] {
        &self.env_vars
    }

    pub fn gpus_per_thread(&self) -> u64 {
        self.gpus_per_thread
    }
}

fn check_vocabulary(
    kind: &'static str,
    value: &str,
    vocabulary: &[&str],
) -> Result<(), ValidationError> {
    if value == ALL || vocabulary.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::UnknownName {
            kind,
            value: value.to_string(),
        })
    }
}

fn string_list(field: &'static str, value: &Value) -> Result<Vec<String>, ValidationError> {
    let wrong = ValidationError::WrongType {
        field,
        expected: "a list of strings",
    };
    let items = match value {
        Value::Array(items) => items,
        // A bare scalar is accepted as a one-element list.
        Value::String(s) => return Ok(vec![s.clone()]),
        _ => return Err(wrong),
    };
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(|| wrong.clone()))
        .collect()
}

fn positive_int(field: &'static str, value: &Value) -> Result<u64, ValidationError> {
    match value.as_u64() {
        Some(n) if n > 0 => Ok(n),
        Some(_) => Err(ValidationError::NotPositive(field)),
        None if value.is_i64() => Err(ValidationError::NotPositive(field)),
        None => Err(ValidationError::WrongType {
            field,
            expected: "a positive integer",
        }),
    }
}

fn parse_step(
    list_form: Option<&Value>,
    single_form: Option<&Value>,
) -> Result<Option<StepRule>, ValidationError> {
    let raw = match list_form.filter(|v| !v.is_null()).or(single_form) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => match items.first() {
            Some(first) => first,
            None => return Ok(None),
        },
        Some(other) => other,
    };
    let obj = raw.as_object().ok_or(ValidationError::WrongType {
        field: "step_details",
        expected: "a mapping with `type` and `value`",
    })?;
    let kind_raw = obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .ok_or(ValidationError::MissingField("step_details.type"))?;
    let kind_str = kind_raw.as_str().ok_or(ValidationError::WrongType {
        field: "step_details.type",
        expected: "a string",
    })?;
    let kind: StepKind = kind_str.parse()?;
    let value = positive_int(
        "step_details.value",
        obj.get("value")
            .ok_or(ValidationError::MissingField("step_details.value"))?,
    )?;
    Ok(Some(StepRule { kind, value }))
}

fn parse_env_entry(index: usize, entry: &Value) -> Result<EnvOverride, ValidationError> {
    let invalid = ValidationError::InvalidEnvVar { index };
    let obj = entry.as_object().ok_or_else(|| invalid.clone())?;
    let name = obj
        .get("id")
        .or_else(|| obj.get("name"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid.clone())?;
    let value = obj
        .get("value")
        .and_then(scalar_to_string)
        .ok_or(invalid)?;
    Ok(EnvOverride {
        name: name.to_string(),
        value,
    })
}

pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "collectives": ["all_reduce"],
            "start_size": 1,
            "end_size": 1024,
            "iterations": 2,
            "operation": ["sum"],
            "step_details": [{"type": "multiple", "value": 2}],
            "datatypes": ["float"]
        })
    }

    fn with(mut raw: Value, key: &str, value: Value) -> Value {
        raw.as_object_mut().expect("object").insert(key.to_string(), value);
        raw
    }

    #[test]
    fn every_vocabulary_member_validates() {
        for c in COLLECTIVES.iter().chain([ALL].iter()) {
            let raw = with(base(), "collectives", json!([c]));
            TestDefinition::validate(&raw).unwrap_or_else(|e| panic!("{c}: {e}"));
        }
        for d in DATATYPES {
            let raw = with(base(), "datatypes", json!([d]));
            TestDefinition::validate(&raw).unwrap_or_else(|e| panic!("{d}: {e}"));
        }
    }

    #[test]
    fn unknown_collective_and_datatype_fail() {
        let err = TestDefinition::validate(&with(base(), "collectives", json!(["allreduce"])))
            .expect_err("unknown collective");
        assert_eq!(
            err,
            ValidationError::UnknownName {
                kind: "collective",
                value: "allreduce".to_string()
            }
        );
        let err = TestDefinition::validate(&with(base(), "datatypes", json!(["float", "f128"])))
            .expect_err("unknown datatype");
        assert!(err.to_string().contains("f128"), "{err}");
    }

    #[test]
    fn defaults_apply_for_optional_fields() {
        let def = TestDefinition::validate(&base()).expect("valid");
        assert_eq!(def.gpus_per_thread(), 1);
        assert!(def.env_vars().is_empty());
        assert_eq!(
            def.step(),
            Some(StepRule {
                kind: StepKind::Multiple,
                value: 2
            })
        );
    }

    #[test]
    fn negative_sizes_are_rejected() {
        let err = TestDefinition::validate(&with(base(), "start_size", json!(-1)))
            .expect_err("negative start");
        assert_eq!(
            err,
            ValidationError::NegativeSize {
                field: "start_size",
                value: -1
            }
        );
    }

    #[test]
    fn suffixed_sizes_keep_their_text() {
        let def = TestDefinition::validate(&with(base(), "end_size", json!("16g"))).expect("valid");
        assert_eq!(def.end_size().as_arg(), "16g");
        assert_eq!(def.end_size().to_bytes(), 16 << 30);
        assert!(TestDefinition::validate(&with(base(), "end_size", json!("16x"))).is_err());
    }

    #[test]
    fn unknown_step_kind_fails_construction() {
        let raw = with(base(), "step_details", json!([{"type": "geometric", "value": 2}]));
        assert_eq!(
            TestDefinition::validate(&raw).expect_err("bad step"),
            ValidationError::InvalidStepKind("geometric".to_string())
        );
    }

    #[test]
    fn single_step_detail_mapping_is_accepted() {
        let mut raw = base();
        raw.as_object_mut().expect("object").remove("step_details");
        let raw = with(raw, "step_detail", json!({"kind": "increment", "value": 64}));
        let def = TestDefinition::validate(&raw).expect("valid");
        assert_eq!(def.step().map(|s| s.kind), Some(StepKind::Increment));
    }

    #[test]
    fn env_entries_must_be_mappings_with_id_and_value() {
        let raw = with(
            base(),
            "ENV_VARS",
            json!([{"id": "NCCL_MAX_NCHANNELS", "value": 8}, {"id": "NCCL_MIN_CTAS", "value": "default"}]),
        );
        let def = TestDefinition::validate(&raw).expect("valid");
        assert_eq!(def.env_vars()[0].value, "8");
        assert!(def.env_vars()[1].is_default());

        let raw = with(base(), "ENV_VARS", json!(["NCCL_MAX_NCHANNELS=8"]));
        assert_eq!(
            TestDefinition::validate(&raw).expect_err("string entry"),
            ValidationError::InvalidEnvVar { index: 0 }
        );
        let raw = with(base(), "ENV_VARS", json!([{"id": "NCCL_MAX_NCHANNELS"}]));
        assert!(TestDefinition::validate(&raw).is_err());
    }

    #[test]
    fn all_sentinel_expands_to_full_vocabulary() {
        let def = TestDefinition::validate(&with(base(), "collectives", json!(["all"])))
            .expect("valid");
        let resolved = def.resolved_collectives();
        assert_eq!(resolved.len(), COLLECTIVES.len());
        assert!(!resolved.iter().any(|c| c == ALL));
    }

    #[test]
    fn zero_iterations_rejected() {
        assert_eq!(
            TestDefinition::validate(&with(base(), "iterations", json!(0))).expect_err("zero"),
            ValidationError::NotPositive("iterations")
        );
    }
}
