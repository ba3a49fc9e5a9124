//! Null backend — accepts jobs and runs nothing.
//!
//! Every submitted job is reported as successfully done straight away, which
//! makes this driver a dry-run stand-in for queue manager tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::driver::options::DriverOptions;
use crate::driver::state::{JobOutcome, JobStatus};
use crate::driver::{BackendJob, Driver, DriverKind, JobHandle, JobRequest};
use crate::error::SubmitError;

#[derive(Debug)]
pub struct NullDriver {
    options: DriverOptions,
    closed: AtomicBool,
}

impl NullDriver {
    pub fn new() -> Self {
        Self {
            options: DriverOptions::generic(DriverKind::Null.driver_name()),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for NullDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Null
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmitError> {
        request.validate()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::QueueClosed {
                driver: self.name().to_string(),
            });
        }
        tracing::debug!(job = %request.job_name, "Null driver accepted job");
        Ok(JobHandle::new(DriverKind::Null, request, Box::new(NullJob)))
    }

    async fn free_driver(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn options(&self) -> &DriverOptions {
        &self.options
    }
}

#[derive(Debug)]
struct NullJob;

#[async_trait]
impl BackendJob for NullJob {
    fn status(&self) -> JobStatus {
        JobStatus::Done(JobOutcome::Success)
    }

    fn cancel(&self) {}

    fn is_active(&self) -> bool {
        false
    }

    async fn wait(&mut self) -> JobStatus {
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_are_done_immediately() {
        let driver = NullDriver::new();
        let request = JobRequest::new("/does/not/matter", "/tmp/null-job");
        let job = driver.submit(&request).await.unwrap();

        assert_eq!(job.kind(), DriverKind::Null);
        assert!(!job.is_active());
        assert_eq!(
            driver.get_status(&job).await,
            JobStatus::Done(JobOutcome::Success)
        );
        driver.kill(&job).await;
        assert_eq!(
            driver.get_status(&job).await,
            JobStatus::Done(JobOutcome::Success)
        );
        driver.free_job(job).await;
    }

    #[tokio::test]
    async fn closed_driver_rejects_jobs() {
        let driver = NullDriver::new();
        driver.free_driver().await;
        let err = driver
            .submit(&JobRequest::new("/bin/true", "/tmp/null-job"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::QueueClosed { .. }));
    }

    #[tokio::test]
    async fn options_follow_generic_namespace() {
        let driver = NullDriver::new();
        assert_eq!(driver.name(), "NULL");
        assert_eq!(driver.list_options(), vec!["MAX_RUNNING".to_string()]);
        assert!(driver.set_option("MAX_RUNNING", "3").await);
        assert_eq!(driver.max_running().await, 3);
        assert!(!driver.set_option("QUEUE", "normal").await);
        assert_eq!(driver.get_option("QUEUE").await, None);
    }
}
