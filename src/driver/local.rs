//! Local backend — runs each job on a dedicated OS thread.
//!
//! Thread-per-job rather than a pool: the workloads are a handful of
//! long-running simulations, not many short tasks. The worker thread owns
//! the child process and lives exactly as long as it does.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::LocalDriverConfig;
use crate::driver::options::DriverOptions;
use crate::driver::state::{JobOutcome, JobStatus};
use crate::driver::{BackendJob, Driver, DriverKind, JobHandle, JobRequest};
use crate::error::SubmitError;

/// Bookkeeping guarded by the submission lock.
#[derive(Debug, Default)]
struct SubmitState {
    /// Sequence number for the next worker thread name.
    next_seq: u64,
}

/// Driver executing jobs as child processes of this host.
pub struct LocalDriver {
    config: LocalDriverConfig,
    options: DriverOptions,
    /// Held only around handle creation and the spawn call, never while
    /// jobs execute.
    submit_lock: Mutex<SubmitState>,
    closed: AtomicBool,
    /// Worker threads that have not yet exited.
    live_workers: Arc<AtomicUsize>,
    /// Handles returned by `submit` and not yet dropped.
    outstanding: Arc<AtomicUsize>,
}

impl LocalDriver {
    pub fn new(config: LocalDriverConfig) -> Self {
        Self {
            config,
            options: DriverOptions::generic(DriverKind::Local.driver_name()),
            submit_lock: Mutex::new(SubmitState::default()),
            closed: AtomicBool::new(false),
            live_workers: Arc::new(AtomicUsize::new(0)),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of worker threads still running.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Number of handles that have not been freed.
    pub fn outstanding_jobs(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn thread_builder(&self, seq: u64) -> thread::Builder {
        let builder = thread::Builder::new().name(format!("{}-{seq}", self.config.thread_name_prefix));
        match self.config.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new(LocalDriverConfig::default())
    }
}

impl std::fmt::Debug for LocalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDriver")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("live_workers", &self.live_workers())
            .field("outstanding", &self.outstanding_jobs())
            .finish()
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Local
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmitError> {
        request.validate()?;

        let job_id = Uuid::new_v4();
        let finished = Arc::new(OnceLock::new());
        let (cancel_tx, cancel_rx) = mpsc::channel();
        let worker = WorkerContext {
            job_id,
            command: request.command.clone(),
            run_path: request.run_path.clone(),
            args: request.args.clone(),
            poll_interval: self.config.poll_interval,
            cancel_rx,
            finished: Arc::clone(&finished),
            live_workers: Arc::clone(&self.live_workers),
        };

        let mut state = self.submit_lock.lock().await;
        if self.is_closed() {
            return Err(SubmitError::QueueClosed {
                driver: self.name().to_string(),
            });
        }

        self.live_workers.fetch_add(1, Ordering::SeqCst);
        let thread = match self
            .thread_builder(state.next_seq)
            .spawn(move || worker.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                self.live_workers.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(job = %request.job_name, error = %e, "Failed to spawn worker thread");
                return Err(SubmitError::DriverFail {
                    driver: self.name().to_string(),
                    name: request.job_name.clone(),
                    reason: format!("failed to spawn worker thread: {e}"),
                });
            }
        };
        state.next_seq += 1;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        drop(state);

        tracing::info!(
            job_id = %job_id,
            job = %request.job_name,
            command = %request.command,
            run_path = %request.run_path.display(),
            num_cpu = request.num_cpu,
            "Submitted local job"
        );

        let job = LocalJob {
            job_id,
            thread: Some(thread),
            cancel_tx,
            finished,
            outstanding: Arc::clone(&self.outstanding),
        };
        Ok(JobHandle::new(DriverKind::Local, request, Box::new(job)))
    }

    async fn free_driver(&self) {
        let _state = self.submit_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);

        let outstanding = self.outstanding_jobs();
        if outstanding > 0 {
            tracing::warn!(outstanding, "Local driver freed with job handles still outstanding");
        }
        tracing::info!("Local driver closed");
    }

    fn options(&self) -> &DriverOptions {
        &self.options
    }
}

/// Everything a worker thread needs, moved into the thread at spawn.
struct WorkerContext {
    job_id: Uuid,
    command: String,
    run_path: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
    cancel_rx: Receiver<()>,
    finished: Arc<OnceLock<JobOutcome>>,
    live_workers: Arc<AtomicUsize>,
}

/// Runs last on the worker thread, panics included: an outcome is always
/// recorded before the worker counts as gone.
struct WorkerExit {
    finished: Arc<OnceLock<JobOutcome>>,
    live_workers: Arc<AtomicUsize>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        // No-op unless the worker panicked before reporting.
        let _ = self.finished.set(JobOutcome::LaunchFailed);
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerContext {
    fn run(self) {
        let _exit = WorkerExit {
            finished: Arc::clone(&self.finished),
            live_workers: Arc::clone(&self.live_workers),
        };
        let outcome = self.execute();
        tracing::info!(job_id = %self.job_id, %outcome, "Local job finished");
        let _ = self.finished.set(outcome);
    }

    fn execute(&self) -> JobOutcome {
        let mut command = Command::new(&self.command);
        if self.args.is_empty() {
            command.arg(&self.run_path);
        } else {
            command.args(&self.args);
        }
        let child = command.spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    command = %self.command,
                    error = %e,
                    "Failed to launch job program"
                );
                return JobOutcome::LaunchFailed;
            }
        };

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return JobOutcome::from_exit_status(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Lost track of job process");
                    return terminate(&mut child);
                }
            }

            match self.cancel_rx.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                // A dropped handle cancels the job as well.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return JobOutcome::from_exit_status(status);
                    }
                    tracing::info!(job_id = %self.job_id, "Cancelling job process");
                    return terminate(&mut child);
                }
            }
        }
    }
}

/// SIGKILL, which `Child::kill` delivers on Unix.
const SIGKILL: i32 = 9;

/// Kill the child and reap it. A child that exited on its own just before
/// the kill keeps its real outcome.
fn terminate(child: &mut Child) -> JobOutcome {
    let _ = child.kill();
    match child.wait() {
        Ok(status) => match JobOutcome::from_exit_status(status) {
            JobOutcome::Signaled { signal: SIGKILL } => JobOutcome::Killed,
            outcome => outcome,
        },
        Err(_) => JobOutcome::Killed,
    }
}

/// Execution state of one local job.
#[derive(Debug)]
struct LocalJob {
    job_id: Uuid,
    /// `None` once the worker has been joined.
    thread: Option<JoinHandle<()>>,
    cancel_tx: Sender<()>,
    finished: Arc<OnceLock<JobOutcome>>,
    outstanding: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendJob for LocalJob {
    fn status(&self) -> JobStatus {
        // The worker records its outcome as its final act, so an empty slot
        // means it is still alive.
        match self.finished.get() {
            Some(outcome) => JobStatus::Done(*outcome),
            None => JobStatus::Running,
        }
    }

    fn cancel(&self) {
        // The worker may already be gone.
        let _ = self.cancel_tx.send(());
    }

    fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    async fn wait(&mut self) -> JobStatus {
        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::error!(job_id = %self.job_id, "Worker thread panicked");
            }
        }
        self.status()
    }
}

impl Drop for LocalJob {
    fn drop(&mut self) {
        if self.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!(job_id = %self.job_id, "Job handle dropped while running, cancelling");
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
