use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use futures::future::join_all;

use queue_driver::driver::registry;
use queue_driver::{Driver, DriverConfig, JobHandle, JobRequest, JobStatus};

/// How often the runner polls job status.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Driver selected by the `QUEUE_DRIVER*` environment.
fn load_driver() -> queue_driver::Result<Arc<dyn Driver>> {
    let config = DriverConfig::from_env()?;
    Ok(registry::alloc(config.kind, &config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut argv = std::env::args().skip(1);
    let Some(executable) = argv.next() else {
        eprintln!("Usage: queue-driver <executable> <run_path>...");
        eprintln!("  QUEUE_DRIVER=local|null selects the backend");
        std::process::exit(2);
    };
    let run_paths: Vec<String> = argv.collect();
    if run_paths.is_empty() {
        bail!("at least one run path is required");
    }

    let driver = load_driver().context("failed to set up the driver")?;

    let mut jobs: Vec<JobHandle> = Vec::with_capacity(run_paths.len());
    for run_path in &run_paths {
        let request = JobRequest::new(executable.clone(), run_path);
        match driver.submit(&request).await {
            Ok(job) => jobs.push(job),
            Err(e) => tracing::error!(
                run_path,
                status = %e.status(),
                retryable = e.is_retryable(),
                error = %e,
                "Submit failed"
            ),
        }
    }

    let interrupted = tokio::select! {
        _ = wait_until_done(driver.as_ref(), &jobs) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::warn!("Interrupted, killing {} job(s)", jobs.len());
        join_all(jobs.iter().map(|job| driver.kill(job))).await;
    }

    let mut failures = run_paths.len() - jobs.len();
    for mut job in jobs {
        let status = job.wait().await;
        if !status.outcome().is_some_and(|o| o.is_success()) {
            failures += 1;
        }
        println!("{}", serde_json::to_string(&job.snapshot())?);
        driver.free_job(job).await;
    }
    driver.free_driver().await;

    if failures > 0 {
        bail!("{failures} job(s) did not succeed");
    }
    Ok(())
}

async fn wait_until_done(driver: &dyn Driver, jobs: &[JobHandle]) {
    loop {
        let statuses = join_all(jobs.iter().map(|job| driver.get_status(job))).await;
        if statuses.iter().all(JobStatus::is_done) {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
