use serde_yaml::{Mapping, Value};

pub struct EnvAxis {
    pub name: String,
    pub values: Vec<i64>,
}

impl EnvAxis {
    pub fn new(name: &str, values: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }
}

pub const ALL_OFF_ENTRY: &str = "all_nccl_env_vars_off";

pub fn default_nccl_axes() -> Vec<EnvAxis> {
    vec![
        EnvAxis::new("NCCL_MIN_NCHANNELS", &[12, 16, 32]),
        EnvAxis::new("NCCL_MAX_NCHANNELS", &[1, 4, 8, 16, 32, 64, 128]),
        EnvAxis::new("NCCL_NCHANNELS_PER_NET_PEER", &[1, 2, 4, 8, 16, 32]),
        EnvAxis::new("NCCL_NCHANNELS_PER_PEER", &[1, 2, 4, 8, 16, 32]),
        EnvAxis::new("NCCL_MIN_P2P_NCHANNELS", &[1, 2, 4, 8, 16]),
        EnvAxis::new("NCCL_MAX_P2P_NCHANNELS", &[4, 8, 16, 32]),
        EnvAxis::new("NCCL_IGNORE_CPU_AFFINITY", &[0, 1]),
        EnvAxis::new("NCCL_MAX_CTAS", &[1, 2, 4, 8]),
        EnvAxis::new("NCCL_MIN_CTAS", &[1, 2, 4, 8]),
    ]
}

/// Base test fields shared by every generated entry: every collective,
/// operation and datatype, 1 byte to 16 GiB doubling, two iterations.
pub fn default_template() -> Mapping {
    let mut m = Mapping::new();
    m.insert("collectives".into(), seq(&["all"]));
    m.insert("start_size".into(), Value::from(1));
    m.insert("end_size".into(), Value::from("16g"));
    m.insert("iterations".into(), Value::from(2));
    m.insert("operation".into(), seq(&["all"]));
    let mut step = Mapping::new();
    step.insert("type".into(), Value::from("multiple"));
    step.insert("value".into(), Value::from(2));
    m.insert(
        "step_details".into(),
        Value::Sequence(vec![Value::Mapping(step)]),
    );
    m.insert("datatypes".into(), seq(&["all"]));
    m
}

fn seq(items: &[&str]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(*s)).collect())
}

fn env_entry(name: &str, value: Value) -> Value {
    let mut m = Mapping::new();
    m.insert("id".into(), Value::from(name));
    m.insert("value".into(), value);
    Value::Mapping(m)
}

/// One entry per (variable, value) with the other variables left at
/// `default`, followed by an entry with every variable forced to `0`.
pub fn generate_env_sweep(axes: &[EnvAxis], template: &Mapping) -> Mapping {
    let mut suite = Mapping::new();
    for axis in axes {
        for value in &axis.values {
            let mut entry = template.clone();
            let mut env = vec![env_entry(&axis.name, Value::from(*value))];
            for other in axes.iter().filter(|o| o.name != axis.name) {
                env.push(env_entry(&other.name, Value::from("default")));
            }
            entry.insert("ENV_VARS".into(), Value::Sequence(env));
            let name = format!("{}_{}", axis.name.to_lowercase(), value);
            suite.insert(Value::from(name), Value::Mapping(entry));
        }
    }
    let mut off = template.clone();
    off.insert(
        "ENV_VARS".into(),
        Value::Sequence(
            axes.iter()
                .map(|a| env_entry(&a.name, Value::from(0)))
                .collect(),
        ),
    );
    suite.insert(Value::from(ALL_OFF_ENTRY), Value::Mapping(off));
    suite
}
