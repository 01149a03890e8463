use thiserror::Error;

/// A malformed scenario or threshold declaration. Always fatal before the run starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("`{field}`: invalid duration: {reason}")]
    InvalidDuration { field: String, reason: String },

    #[error("`{field}`: ramping-vus requires at least one stage")]
    EmptyStages { field: String },

    #[error("`{field}`: unparseable threshold `{expr}`: {reason}")]
    InvalidThreshold {
        field: String,
        expr: String,
        reason: String,
    },

    #[error("`{field}`: no metric named `{metric}` is registered")]
    UnknownMetric { field: String, metric: String },

    #[error("`{field}`: aggregator `{aggregator}` does not apply to {kind} metrics")]
    AggregatorMismatch {
        field: String,
        aggregator: String,
        kind: &'static str,
    },

    #[error("`{field}`: no workload named `{exec}` is registered")]
    UnknownWorkload { field: String, exec: String },

    #[error("`{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid configuration document: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Path of the offending field, when the error names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidDuration { field, .. }
            | Self::EmptyStages { field }
            | Self::InvalidThreshold { field, .. }
            | Self::UnknownMetric { field, .. }
            | Self::AggregatorMismatch { field, .. }
            | Self::UnknownWorkload { field, .. }
            | Self::Invalid { field, .. } => Some(field),
            Self::Parse(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
