//! Step sequencing, deadlines and process-group teardown.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use fb_deploy::{SolverDef, StepDef};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::process::ProcessGroup;
use crate::program::spawn_path;
use crate::types::{RunStatus, SolverRun, StepRecord};

/// How long to wait for a killed group to disappear before giving up.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);
const REAP_POLL: Duration = Duration::from_millis(20);

/// Time bounds for one solver run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLimits {
    /// Wall-clock budget shared by all steps.
    pub timeout: Duration,
    /// Delay between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl RunLimits {
    pub fn from_solver(solver: &SolverDef) -> Self {
        Self {
            timeout: seconds(solver.timeout_s),
            kill_grace: seconds(solver.kill_grace_s),
        }
    }

    /// Tighten the timeout to `requested` when it is shorter.
    pub fn clamped(self, requested: Option<Duration>) -> Self {
        match requested {
            Some(t) if t < self.timeout => Self { timeout: t, ..self },
            _ => self,
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

/// Run every step of `solver` in `case_dir`.
///
/// Never fails as a function: launch problems, nonzero exits, timeouts and
/// cancellation all surface as the run's [`RunStatus`]. Dropping the
/// returned future kills the process group of the step in flight.
pub async fn run(
    case_dir: &Path,
    solver: &SolverDef,
    limits: RunLimits,
    cancel: &CancellationToken,
) -> SolverRun {
    let started_at = Utc::now();
    let start = Instant::now();
    let deadline = start.checked_add(limits.timeout).unwrap_or_else(far_future);

    let mut steps = Vec::with_capacity(solver.steps.len());
    let mut status = RunStatus::Success;

    for step in &solver.steps {
        if cancel.is_cancelled() {
            status = RunStatus::Cancelled {
                step: step.name.clone(),
            };
            break;
        }
        if Instant::now() >= deadline {
            status = RunStatus::TimedOut {
                step: step.name.clone(),
            };
            break;
        }

        let (record, outcome) =
            run_step(case_dir, step, &solver.env, deadline, limits.kill_grace, cancel).await;
        if let Some(record) = record {
            steps.push(record);
        }
        if !outcome.is_success() {
            status = outcome;
            break;
        }
    }

    let log_tail = match steps.last() {
        Some(last) => read_tail(&last.log_file, solver.log_tail_bytes).await,
        None => String::new(),
    };

    let elapsed = start.elapsed();
    match &status {
        RunStatus::Success => tracing::info!(?elapsed, steps = steps.len(), "solver run succeeded"),
        other => tracing::warn!(?elapsed, status = ?other, "solver run failed"),
    }

    SolverRun {
        status,
        started_at,
        timeout: limits.timeout,
        elapsed,
        steps,
        log_tail,
    }
}

async fn run_step(
    case_dir: &Path,
    step: &StepDef,
    env: &BTreeMap<String, String>,
    deadline: Instant,
    kill_grace: Duration,
    cancel: &CancellationToken,
) -> (Option<StepRecord>, RunStatus) {
    let log_file = case_dir.join(format!("log.{}", step.name));
    let launch_failed = |reason: String| RunStatus::LaunchFailed {
        step: step.name.clone(),
        reason,
    };

    let (stdout, stderr) = match open_log(&log_file) {
        Ok(pair) => pair,
        Err(e) => {
            return (
                None,
                launch_failed(format!("cannot open {}: {e}", log_file.display())),
            );
        }
    };

    let mut cmd = Command::new(spawn_path(&step.program, case_dir));
    cmd.args(&step.args)
        .current_dir(case_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let step_start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(step = %step.name, program = %step.program, error = %e, "failed to launch step");
            let record = StepRecord {
                name: step.name.clone(),
                program: step.program.clone(),
                log_file,
                process_group: None,
                exit_code: None,
                signal: None,
                duration: step_start.elapsed(),
            };
            return (Some(record), launch_failed(e.to_string()));
        }
    };

    // Declared right after spawn so an abandoned future still tears down
    // the whole group.
    let mut group = ProcessGroup::new(child.id());
    tracing::info!(step = %step.name, pgid = ?group.id(), "solver step started");

    let wake = tokio::select! {
        biased;
        status = child.wait() => Wake::Exited(status),
        _ = cancel.cancelled() => Wake::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
    };

    let (exit, outcome) = match wake {
        Wake::Exited(Ok(status)) => {
            let outcome = if status.success() {
                RunStatus::Success
            } else {
                RunStatus::NonZeroExit {
                    step: step.name.clone(),
                    code: status.code(),
                    signal: exit_signal(&status),
                }
            };
            (Some(status), outcome)
        }
        Wake::Exited(Err(e)) => {
            tracing::warn!(step = %step.name, error = %e, "failed to wait for step");
            let status = stop(&mut child, &group, Duration::ZERO).await;
            (status, launch_failed(format!("wait failed: {e}")))
        }
        Wake::Deadline => {
            tracing::warn!(step = %step.name, pgid = ?group.id(), "deadline reached, terminating step");
            let status = stop(&mut child, &group, kill_grace).await;
            (
                status,
                RunStatus::TimedOut {
                    step: step.name.clone(),
                },
            )
        }
        Wake::Cancelled => {
            tracing::info!(step = %step.name, pgid = ?group.id(), "run cancelled, terminating step");
            let status = stop(&mut child, &group, kill_grace).await;
            (
                status,
                RunStatus::Cancelled {
                    step: step.name.clone(),
                },
            )
        }
    };

    // Background jobs the step left behind die with it. An emptied group's
    // id is free for reuse, so the guard must not signal it again.
    let pgid = group.id();
    if reap(&group).await {
        group.disarm();
    }

    let record = StepRecord {
        name: step.name.clone(),
        program: step.program.clone(),
        log_file,
        process_group: pgid,
        exit_code: exit.and_then(|s| s.code()),
        signal: exit.as_ref().and_then(exit_signal),
        duration: step_start.elapsed(),
    };
    tracing::debug!(
        step = %record.name,
        exit_code = ?record.exit_code,
        signal = ?record.signal,
        duration = ?record.duration,
        "solver step finished"
    );
    (Some(record), outcome)
}

fn open_log(path: &Path) -> std::io::Result<(Stdio, Stdio)> {
    let file = std::fs::File::create(path)?;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

/// SIGTERM the group, give it `grace`, then SIGKILL.
async fn stop(child: &mut Child, group: &ProcessGroup, grace: Duration) -> Option<ExitStatus> {
    if !grace.is_zero()
        && group.terminate()
        && let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await
    {
        return Some(status);
    }
    if !group.kill() {
        // No group to signal; fall back to the direct child.
        let _ = child.start_kill();
    }
    child.wait().await.ok()
}

/// Kill whatever is left in the group and wait until it is gone.
///
/// Returns `false` when members survived [`REAP_TIMEOUT`].
async fn reap(group: &ProcessGroup) -> bool {
    group.kill();
    let give_up = Instant::now() + REAP_TIMEOUT;
    while group.has_live_members() {
        if Instant::now() >= give_up {
            tracing::warn!(pgid = ?group.id(), "process group still has live members after SIGKILL");
            return false;
        }
        tokio::time::sleep(REAP_POLL).await;
        group.kill();
    }
    true
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

/// Last `limit` bytes of a log, lossily decoded.
async fn read_tail(path: &Path, limit: usize) -> String {
    let read = async {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let start = len.saturating_sub(limit);
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };
    match read.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no log tail available");
            String::new()
        }
    }
}
