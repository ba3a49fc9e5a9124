//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Immediate outcome of a `submit` call.
///
/// Discriminants match the numeric codes queue managers have historically
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Ok = 0,
    /// Typically no more attempts.
    JobFail = 1,
    /// The driver would not take the job.
    DriverFail = 2,
    /// The queue is not accepting more jobs.
    QueueClosed = 3,
}

impl std::fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::JobFail => "job_fail",
            Self::DriverFail => "driver_fail",
            Self::QueueClosed => "queue_closed",
        };
        write!(f, "{s}")
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum JobOutcome {
    /// The program exited with status zero.
    Success,
    /// The program exited with a non-zero status.
    Failed { code: i32 },
    /// The program was terminated by a signal it did not receive from us.
    Signaled { signal: i32 },
    /// The job was cancelled through `kill` or `free_job`.
    Killed,
    /// The program could not be started at all.
    LaunchFailed,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Classify a child's exit status.
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        if let Some(code) = status.code() {
            return Self::Failed { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled { signal };
            }
        }
        Self::Failed { code: -1 }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed { code } => write!(f, "failed (exit code {code})"),
            Self::Signaled { signal } => write!(f, "terminated by signal {signal}"),
            Self::Killed => write!(f, "killed"),
            Self::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

/// Polled status of a job.
///
/// `Unregistered` is a guard value for handles that carry no backend state;
/// a handle returned by a successful `submit` only ever reports `Running`
/// or `Done`. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Unregistered,
    Running,
    Done(JobOutcome),
}

impl JobStatus {
    /// Check if this state is terminal.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Check whether moving to `target` is a legal transition.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Unregistered, Running) | (Running, Done(_)) => true,
            (current, next) => *current == next,
        }
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        match self {
            Self::Done(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::Running => write!(f, "running"),
            Self::Done(outcome) => write!(f, "done: {outcome}"),
        }
    }
}
