#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod clock;
mod error;
mod executor;
pub mod pool;
mod run;
mod scheduler;
pub mod series;
pub mod threshold;
#[doc(hidden)]
pub mod transaction;
pub mod transport;
pub mod workload;

pub use error::RunError;
pub use executor::Progress;
pub use run::TestRun;
pub use stampede_macros::transaction;

pub use stampede_core::{
    ConfigError, ExecutorConfig, MetricKind, MetricSummary, Report, ScenarioConfig,
    ScenarioReport, Stage, TestConfig, ThresholdConfig, ThresholdOutcome, ThresholdStatus,
    Verdict,
};

pub mod prelude {
    pub use crate::pool::SharedPool;
    pub use crate::series::{Metrics, MetricError};
    pub use crate::transport::{Response, Transport, TransportError};
    pub use crate::workload::{workload_fn, StepContext, Workload, WorkloadMix};
    pub use crate::{RunError, TestRun};
    pub use stampede_core::{Report, ScenarioConfig, Stage, TestConfig, Verdict};
    pub use stampede_macros::transaction;

    #[cfg(feature = "http")]
    pub use crate::transport::HttpTransport;
}
