//! Queue driver — uniform job execution contract over local and batch backends.

pub mod config;
pub mod driver;
pub mod error;

pub use config::{DriverConfig, LocalDriverConfig};
pub use driver::{
    Driver, DriverKind, DriverRegistry, JobHandle, JobOutcome, JobRequest, JobSnapshot, JobStatus,
    SubmitStatus,
};
pub use error::{Error, Result};
