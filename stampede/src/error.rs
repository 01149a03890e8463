use crate::series::MetricError;
use stampede_core::ConfigError;
use thiserror::Error;

/// Why a test run could not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metric(#[from] MetricError),
}
