use thiserror::Error;

/// A test definition that cannot be turned into a [`crate::config::TestDefinition`].
///
/// Fatal to the one test it came from; a sweep logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("top-level suite must be a mapping of test name to test definition")]
    NotAMapping,

    #[error("test definition must be a mapping")]
    DefinitionNotAMapping,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown {kind} `{value}`")]
    UnknownName { kind: &'static str, value: String },

    #[error("field `{field}` cannot be less than 0 (got {value})")]
    NegativeSize { field: &'static str, value: i64 },

    #[error("field `{field}` has an invalid size `{value}`")]
    InvalidSize { field: &'static str, value: String },

    #[error("invalid step type `{0}`: must be one of multiple, increment")]
    InvalidStepKind(String),

    #[error("field `{0}` must be a positive integer")]
    NotPositive(&'static str),

    #[error("ENV_VARS entry {index} must be a mapping with an `id` and a `value`")]
    InvalidEnvVar { index: usize },
}
