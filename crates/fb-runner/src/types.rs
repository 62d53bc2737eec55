//! What a solver run reports back.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunnerError;

/// Terminal status of a solver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// `code` is `None` when the step died from a signal.
    NonZeroExit {
        step: String,
        code: Option<i32>,
        signal: Option<i32>,
    },
    TimedOut {
        step: String,
    },
    LaunchFailed {
        step: String,
        reason: String,
    },
    Cancelled {
        step: String,
    },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }

    /// The step the run stopped in, if it did not succeed.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            RunStatus::Success => None,
            RunStatus::NonZeroExit { step, .. }
            | RunStatus::TimedOut { step }
            | RunStatus::LaunchFailed { step, .. }
            | RunStatus::Cancelled { step } => Some(step),
        }
    }
}

/// One executed (or attempted) step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: String,
    pub program: String,
    pub log_file: PathBuf,
    pub process_group: Option<u32>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SolverRun {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// The wall-clock budget shared by every step.
    pub timeout: Duration,
    pub elapsed: Duration,
    pub steps: Vec<StepRecord>,
    /// Bounded tail of the last step's log.
    pub log_tail: String,
}

impl SolverRun {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Process groups that were created for this run.
    pub fn process_groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.steps.iter().filter_map(|s| s.process_group)
    }

    /// `Ok` for a successful run, otherwise the failure with its log tail.
    pub fn check(&self) -> Result<(), RunnerError> {
        let log = self.log_tail.clone();
        match &self.status {
            RunStatus::Success => Ok(()),
            RunStatus::NonZeroExit { step, code, signal } => Err(RunnerError::NonZeroExit {
                step: step.clone(),
                status: describe_exit(*code, *signal),
                log,
            }),
            RunStatus::TimedOut { step } => Err(RunnerError::TimedOut {
                step: step.clone(),
                timeout: self.timeout,
                log,
            }),
            RunStatus::LaunchFailed { step, reason } => Err(RunnerError::LaunchFailed {
                step: step.clone(),
                reason: reason.clone(),
                log,
            }),
            RunStatus::Cancelled { step } => Err(RunnerError::Cancelled {
                step: step.clone(),
                log,
            }),
        }
    }
}

fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    }
}
