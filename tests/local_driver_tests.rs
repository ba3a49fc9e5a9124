#![cfg(unix)]
//! Integration tests for the local driver contract.
//!
//! Every test runs real child processes (`sleep`, `true`, small shell
//! scripts) on dedicated worker threads and polls them through the public
//! `Driver` interface.

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

use queue_driver::driver::{LocalDriver, MAX_RUNNING};
use queue_driver::error::SubmitError;
use queue_driver::{Driver, JobHandle, JobOutcome, JobRequest, JobStatus, LocalDriverConfig};

/// Maximum time any wait is allowed before we consider the test hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn local_driver() -> Arc<LocalDriver> {
    Arc::new(LocalDriver::new(LocalDriverConfig {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }))
}

/// Write an executable shell script into `dir`.
fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Poll until the job reports `Done`.
async fn poll_until_done(driver: &dyn Driver, job: &JobHandle) -> JobStatus {
    timeout(TEST_TIMEOUT, async {
        loop {
            let status = driver.get_status(job).await;
            if status.is_done() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test]
async fn sleep_job_runs_then_completes() {
    let driver = local_driver();
    let request = JobRequest::new("sleep", "/tmp/job1").with_args(["2"]);
    let job = driver.submit(&request).await.unwrap();

    assert_eq!(job.name(), "job1");
    assert_eq!(driver.get_status(&job).await, JobStatus::Running);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        driver.get_status(&job).await,
        JobStatus::Done(JobOutcome::Success)
    );

    // Done is terminal.
    for _ in 0..5 {
        assert_eq!(
            driver.get_status(&job).await,
            JobStatus::Done(JobOutcome::Success)
        );
    }

    driver.free_job(job).await;
    assert_eq!(driver.live_workers(), 0);
    assert_eq!(driver.outstanding_jobs(), 0);
}

#[tokio::test]
async fn nonexistent_executable_finishes_promptly() {
    let driver = local_driver();
    let request = JobRequest::new("/nonexistent/simulator-binary", "/tmp/job2");
    let job = driver.submit(&request).await.unwrap();

    let status = poll_until_done(driver.as_ref(), &job).await;
    assert_eq!(status, JobStatus::Done(JobOutcome::LaunchFailed));

    driver.free_job(job).await;
    assert_eq!(driver.live_workers(), 0);
}

#[tokio::test]
async fn program_receives_run_path_as_argument() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "forward_model.sh", r#"touch "$1/ran""#);

    let driver = local_driver();
    let job = driver
        .submit(&JobRequest::new(script, dir.path()))
        .await
        .unwrap();

    assert_eq!(
        poll_until_done(driver.as_ref(), &job).await,
        JobStatus::Done(JobOutcome::Success)
    );
    assert!(dir.path().join("ran").exists());
    driver.free_job(job).await;
}

#[tokio::test]
async fn exit_code_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "exit 3");

    let driver = local_driver();
    let job = driver
        .submit(&JobRequest::new(script, dir.path()))
        .await
        .unwrap();

    let status = poll_until_done(driver.as_ref(), &job).await;
    assert_eq!(status, JobStatus::Done(JobOutcome::Failed { code: 3 }));
    assert!(!status.outcome().unwrap().is_success());
    driver.free_job(job).await;
}

#[tokio::test]
async fn kill_running_job_returns_without_hanging() {
    let driver = local_driver();
    let request = JobRequest::new("sleep", "/tmp/job3").with_args(["30"]);
    let job = driver.submit(&request).await.unwrap();
    assert_eq!(driver.get_status(&job).await, JobStatus::Running);

    timeout(TEST_TIMEOUT, driver.kill(&job))
        .await
        .expect("kill should not hang");
    // A second kill after the worker is gone is silently ignored.
    let status = poll_until_done(driver.as_ref(), &job).await;
    assert_eq!(status, JobStatus::Done(JobOutcome::Killed));
    driver.kill(&job).await;
    assert_eq!(driver.get_status(&job).await, status);

    driver.free_job(job).await;
    assert_eq!(driver.live_workers(), 0);
}

#[tokio::test]
async fn free_job_cancels_and_reclaims_running_job() {
    let driver = local_driver();
    let request = JobRequest::new("sleep", "/tmp/job4").with_args(["30"]);
    let job = driver.submit(&request).await.unwrap();
    assert!(job.is_active());
    assert_eq!(driver.live_workers(), 1);

    timeout(TEST_TIMEOUT, driver.free_job(job))
        .await
        .expect("free_job should reclaim a running job promptly");
    assert_eq!(driver.live_workers(), 0);
    assert_eq!(driver.outstanding_jobs(), 0);
}

#[tokio::test]
async fn wait_then_free_is_a_noop() {
    let driver = local_driver();
    let mut job = driver
        .submit(&JobRequest::new("true", "/tmp/job5"))
        .await
        .unwrap();

    let status = timeout(TEST_TIMEOUT, job.wait()).await.unwrap();
    assert_eq!(status, JobStatus::Done(JobOutcome::Success));
    assert!(!job.is_active());
    assert_eq!(driver.live_workers(), 0);

    // Waiting again on an inactive handle reports the same outcome.
    assert_eq!(job.wait().await, status);
    driver.free_job(job).await;
    assert_eq!(driver.outstanding_jobs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_yield_independent_handles() {
    const JOBS: usize = 128;

    let driver = local_driver();
    let submissions = (0..JOBS).map(|i| {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            let request = JobRequest::new("true", format!("/tmp/stress/realization-{i}"));
            driver.submit(&request).await
        })
    });
    let handles: Vec<JobHandle> = join_all(submissions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(handles.len(), JOBS);
    assert_eq!(driver.outstanding_jobs(), JOBS);

    let ids: HashSet<_> = handles.iter().map(JobHandle::id).collect();
    assert_eq!(ids.len(), JOBS);
    let names: HashSet<_> = handles.iter().map(|h| h.name().to_string()).collect();
    assert_eq!(names.len(), JOBS);

    for job in &handles {
        assert_ne!(driver.get_status(job).await, JobStatus::Unregistered);
    }
    for job in &handles {
        assert_eq!(
            poll_until_done(driver.as_ref(), job).await,
            JobStatus::Done(JobOutcome::Success)
        );
    }

    join_all(handles.into_iter().map(|job| driver.free_job(job))).await;
    driver.free_driver().await;

    assert_eq!(driver.live_workers(), 0);
    assert_eq!(driver.outstanding_jobs(), 0);
}

#[tokio::test]
async fn submit_after_free_driver_is_rejected() {
    let driver = local_driver();
    let job = driver
        .submit(&JobRequest::new("true", "/tmp/job6"))
        .await
        .unwrap();
    driver.free_job(job).await;
    driver.free_driver().await;

    let err = driver
        .submit(&JobRequest::new("true", "/tmp/job7"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::QueueClosed { .. }));
    assert_eq!(err.status(), queue_driver::SubmitStatus::QueueClosed);
}

#[tokio::test]
async fn options_through_driver_interface() {
    let driver: Arc<dyn Driver> = local_driver();

    assert_eq!(driver.name(), "local");
    assert_eq!(driver.list_options(), vec![MAX_RUNNING.to_string()]);
    assert_eq!(driver.get_option(MAX_RUNNING).await.as_deref(), Some("0"));

    assert!(driver.set_option(MAX_RUNNING, "42").await);
    assert_eq!(driver.get_option(MAX_RUNNING).await.as_deref(), Some("42"));
    assert_eq!(driver.max_running().await, 42);

    assert!(driver.set_option(MAX_RUNNING, "42 ").await);
    assert_eq!(driver.get_option(MAX_RUNNING).await.as_deref(), Some("42 "));

    assert!(driver.unset_option(MAX_RUNNING).await);
    assert_eq!(driver.get_option(MAX_RUNNING).await.as_deref(), Some("0"));

    for _ in 0..3 {
        assert!(!driver.set_option("MAKS_RUNNING", "42").await);
        assert_eq!(driver.get_option("MAKS_RUNNING").await, None);
    }
    assert!(!driver.set_option(MAX_RUNNING, "2a").await);
    assert!(!driver.unset_option("QUEUE").await);
}

#[tokio::test]
async fn snapshot_serializes_status() {
    let driver = local_driver();
    let mut job = driver
        .submit(&JobRequest::new("true", "/tmp/job8").with_name("snap"))
        .await
        .unwrap();
    job.wait().await;

    let snapshot = job.snapshot();
    assert_eq!(snapshot.name, "snap");
    assert_eq!(snapshot.status, JobStatus::Done(JobOutcome::Success));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["driver"], "local");
    assert_eq!(json["status"]["done"]["outcome"], "success");
    assert_eq!(json["run_path"], "/tmp/job8");

    driver.free_job(job).await;
}
