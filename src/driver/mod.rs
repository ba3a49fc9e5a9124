//! Job drivers — one uniform contract over every execution backend.
//!
//! Core components:
//! - `state` — Job status state machine (Running → Done) and submit codes
//! - `options` — String-keyed per-driver option table
//! - `local` — Thread-per-job backend running programs on this host
//! - `null` — Backend that accepts jobs without running anything
//! - `registry` — Driver construction and per-kind caching
//!
//! Callers (the queue manager) only ever see [`Driver`] and [`JobHandle`].
//! A handle carries the backend state of the driver that created it, so a
//! status query or kill can never be routed to the wrong backend.

pub mod local;
pub mod null;
pub mod options;
pub mod registry;
pub mod state;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, SubmitError};

pub use local::LocalDriver;
pub use null::NullDriver;
pub use options::{DriverOptions, MAX_RUNNING, OptionSpec};
pub use registry::DriverRegistry;
pub use state::{JobOutcome, JobStatus, SubmitStatus};

/// Backend variant. Discriminants match the historic driver type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Null = 0,
    Lsf = 1,
    Local = 2,
    Torque = 4,
    Slurm = 5,
}

impl DriverKind {
    pub const ALL: [DriverKind; 5] = [
        DriverKind::Null,
        DriverKind::Lsf,
        DriverKind::Local,
        DriverKind::Torque,
        DriverKind::Slurm,
    ];

    /// Name a driver of this kind reports.
    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Lsf => "LSF",
            Self::Local => "local",
            Self::Torque => "TORQUE",
            Self::Slurm => "SLURM",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Lsf => "lsf",
            Self::Local => "local",
            Self::Torque => "torque",
            Self::Slurm => "slurm",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NULL" => Ok(Self::Null),
            "LSF" => Ok(Self::Lsf),
            "LOCAL" => Ok(Self::Local),
            "TORQUE" => Ok(Self::Torque),
            "SLURM" => Ok(Self::Slurm),
            _ => Err(ConfigError::UnknownDriver(s.to_string())),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Program to execute.
    pub command: String,
    /// Execution slots requested from the backend.
    pub num_cpu: u32,
    /// Run directory. Passed to the program as its only argument when
    /// `args` is empty.
    pub run_path: PathBuf,
    /// Human-readable job name.
    pub job_name: String,
    /// Explicit argument vector. Replaces the run path argument when set.
    pub args: Vec<String>,
}

impl JobRequest {
    /// Request a single-cpu run of `command` in `run_path`.
    ///
    /// The job name defaults to the last component of the run path.
    pub fn new(command: impl Into<String>, run_path: impl Into<PathBuf>) -> Self {
        let run_path = run_path.into();
        let job_name = run_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string());
        Self {
            command: command.into(),
            num_cpu: 1,
            run_path,
            job_name,
            args: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    pub fn with_num_cpu(mut self, num_cpu: u32) -> Self {
        self.num_cpu = num_cpu;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Reject requests no backend could run.
    pub fn validate(&self) -> Result<(), SubmitError> {
        let reason = if self.command.trim().is_empty() {
            "command is empty"
        } else if self.num_cpu == 0 {
            "num_cpu must be at least 1"
        } else {
            return Ok(());
        };
        Err(SubmitError::JobFail {
            name: self.job_name.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Backend-specific execution state behind a [`JobHandle`].
#[async_trait]
pub trait BackendJob: Send + Sync + std::fmt::Debug {
    /// Point-in-time status probe. Never blocks.
    fn status(&self) -> JobStatus;

    /// Ask the backend to stop the job. Best effort, never blocks, and
    /// silently ignores a job that is already gone.
    fn cancel(&self);

    /// Whether execution resources are still held.
    fn is_active(&self) -> bool;

    /// Wait for the job to finish and reclaim its execution resources.
    /// Afterwards the job is inactive.
    async fn wait(&mut self) -> JobStatus;
}

/// Opaque per-submission handle returned by [`Driver::submit`].
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    name: String,
    run_path: PathBuf,
    kind: DriverKind,
    submitted_at: DateTime<Utc>,
    backend: Option<Box<dyn BackendJob>>,
}

impl JobHandle {
    /// Wrap backend state for a freshly submitted job.
    pub fn new(kind: DriverKind, request: &JobRequest, backend: Box<dyn BackendJob>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::unregistered(kind, request)
        }
    }

    /// A handle with no backend state. It reports `Unregistered` forever.
    pub fn unregistered(kind: DriverKind, request: &JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: request.job_name.clone(),
            run_path: request.run_path.clone(),
            kind,
            submitted_at: Utc::now(),
            backend: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_path(&self) -> &Path {
        &self.run_path
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn status(&self) -> JobStatus {
        self.backend
            .as_ref()
            .map_or(JobStatus::Unregistered, |b| b.status())
    }

    /// Request cancellation without waiting for it.
    pub fn cancel(&self) {
        if let Some(backend) = &self.backend {
            backend.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_active())
    }

    /// Wait for completion and reclaim the job's execution resources.
    pub async fn wait(&mut self) -> JobStatus {
        let Some(backend) = self.backend.as_mut() else {
            return JobStatus::Unregistered;
        };
        let before = backend.status();
        let after = backend.wait().await;
        debug_assert!(
            before.can_transition_to(after),
            "job {} went from {before} to {after}",
            self.id
        );
        after
    }

    /// Serializable view of the handle for logs and persisted queue state.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            run_path: self.run_path.clone(),
            driver: self.kind,
            submitted_at: self.submitted_at,
            status: self.status(),
        }
    }
}

/// Point-in-time record of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub name: String,
    pub run_path: PathBuf,
    pub driver: DriverKind,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
}

/// The contract every execution backend implements.
///
/// Drivers are shared as `Arc<dyn Driver>`; `submit` may be called from
/// many tasks at once. Handles are owned by exactly one caller.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend variant, fixed at construction.
    fn kind(&self) -> DriverKind;

    fn name(&self) -> &str {
        self.kind().driver_name()
    }

    /// Start executing `request`. Returns as soon as the job is launched.
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmitError>;

    /// Non-blocking status poll.
    async fn get_status(&self, job: &JobHandle) -> JobStatus {
        let status = job.status();
        tracing::debug!(driver = %self.kind(), job_id = %job.id(), %status, "Polled job status");
        status
    }

    /// Best-effort cancellation. Re-poll the status to learn the outcome.
    async fn kill(&self, job: &JobHandle) {
        tracing::info!(driver = %self.kind(), job_id = %job.id(), job = job.name(), "Kill requested");
        job.cancel();
    }

    /// Release everything bound to `job`. A live job is cancelled first and
    /// then reclaimed; an inactive one is left as is.
    async fn free_job(&self, mut job: JobHandle) {
        if job.is_active() {
            if !job.status().is_done() {
                tracing::warn!(
                    driver = %self.kind(),
                    job_id = %job.id(),
                    job = job.name(),
                    "Freeing running job, cancelling it first"
                );
                job.cancel();
            }
            job.wait().await;
        }
    }

    /// Stop accepting work and release backend-wide resources. Callers
    /// must free every job handle first.
    async fn free_driver(&self);

    /// The driver's option table.
    fn options(&self) -> &DriverOptions;

    /// Returns false for keys outside this backend's namespace or values
    /// the backend rejects.
    async fn set_option(&self, key: &str, value: &str) -> bool {
        match self.options().set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(driver = %self.kind(), error = %e, "Option rejected");
                false
            }
        }
    }

    async fn get_option(&self, key: &str) -> Option<String> {
        self.options().get(key).await
    }

    /// Restore `key` to its default value.
    async fn unset_option(&self, key: &str) -> bool {
        self.options().unset(key).await.is_ok()
    }

    fn list_options(&self) -> Vec<String> {
        self.options().keys()
    }

    /// Advisory concurrency cap for the queue manager; 0 means unlimited.
    async fn max_running(&self) -> usize {
        self.options().max_running().await
    }
}
