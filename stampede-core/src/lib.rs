//! Declarative data model for the stampede load testing engine: scenario and threshold
//! configuration, configuration errors, and the report produced by a run.
mod config;
mod constants;
mod error;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use stats::*;
pub use threshold::*;
