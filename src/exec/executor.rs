use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use grid::{GridExecutor, GridJob, QueueStatus, Scheduler};
use util::Timer;

use super::run_cmd::{run_cmd, run_cmd_checked};
use super::{Error, TaskError};
use crate::fs::Fs;

/// Name that selects the local executor.
pub const LOCAL: &str = "local";

/// How a grid job is watched once submitted.
#[derive(Debug, Clone, Copy)]
pub struct Polling {
    /// pause between checks of the completion marker and the queue
    pub interval: Duration,
    /// how long a job may be gone from the queue without writing its exit status
    pub exit_read_timeout: Duration,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            exit_read_timeout: Duration::from_secs(90),
        }
    }
}

/// Where tasks run: child processes of this one, or jobs on a batch scheduler.
#[derive(Debug, Clone)]
pub enum Executor {
    Local,
    Grid(Arc<dyn Scheduler>),
}

/// A launched task.
#[derive(Debug)]
pub enum Handle {
    Local(Child),
    Grid { job_id: String },
}

impl Executor {
    /// `local`, or the name of a grid backend.
    pub fn by_name(name: &str) -> Result<Self, grid::Error> {
        if name.eq_ignore_ascii_case(LOCAL) {
            Ok(Self::Local)
        } else {
            Ok(Self::Grid(Arc::new(GridExecutor::by_name(name)?)))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local => LOCAL,
            Self::Grid(scheduler) => scheduler.name(),
        }
    }

    /// Directive block for the launcher; empty when running locally.
    pub fn headers(&self, job: &GridJob) -> String {
        match self {
            Self::Local => String::with_capacity(0),
            Self::Grid(scheduler) => scheduler.headers(job),
        }
    }

    /// Start `.command.run` in the job's work dir.
    pub async fn launch(
        &self,
        fs: &Fs,
        job: &GridJob<'_>,
        env: &BTreeMap<String, String>,
    ) -> Result<Handle, TaskError> {
        let mut buf = PathBuf::with_capacity(256);
        let launcher = fs.command_run(job.work_dir, &mut buf);
        match self {
            Self::Local => {
                let child = Command::new("/bin/bash")
                    .arg(launcher)
                    .current_dir(job.work_dir)
                    .env_clear()
                    .envs(env)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| format!("starting {:?}", launcher))
                    .map_err(TaskError::Submission)?;
                log::debug!("{}: started local process {:?}", job.name, child.id());
                Ok(Handle::Local(child))
            }
            Self::Grid(scheduler) => {
                let argv = scheduler.submit_command_line(job, launcher);
                let out = run_cmd_checked(&argv, Some(job.work_dir))
                    .await
                    .map_err(TaskError::Submission)?;
                let job_id = scheduler
                    .parse_job_id(&out.stdout)
                    .map_err(|e| TaskError::Submission(e.into()))?;
                log::info!("{}: submitted as {} job {job_id}", job.name, scheduler.name());
                Ok(Handle::Grid { job_id })
            }
        }
    }

    /// Wait for a launched task and return its exit status. Cancellation and
    /// `timeout` both kill the task and fail it, whatever its last known state.
    pub async fn wait(
        &self,
        fs: &Fs,
        handle: Handle,
        job: &GridJob<'_>,
        timeout: Option<Duration>,
        polling: &Polling,
        token: &CancellationToken,
    ) -> Result<i32, TaskError> {
        match (self, handle) {
            (_, Handle::Local(child)) => wait_local(fs, child, job, timeout, token).await,
            (Self::Grid(scheduler), Handle::Grid { job_id }) => {
                let watch = GridWatch {
                    scheduler: scheduler.as_ref(),
                    fs,
                    job,
                    job_id: &job_id,
                };
                watch.wait(timeout, polling, token).await
            }
            (Self::Local, Handle::Grid { job_id }) => Err(TaskError::Other(anyhow::anyhow!(
                "grid job {job_id} handed to the local executor"
            ))),
        }
    }
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn wait_local(
    fs: &Fs,
    mut child: Child,
    job: &GridJob<'_>,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<i32, TaskError> {
    let name = job.name.to_owned();
    let status = tokio::select! {
        status = child.wait() => status
            .context("waiting for task process")
            .map_err(TaskError::Execution)?,
        _ = token.cancelled() => {
            kill_child(&mut child).await;
            return Err(TaskError::Execution(Error::Killed(name).into()));
        }
        _ = sleep_or_forever(timeout) => {
            kill_child(&mut child).await;
            let limit = timeout.unwrap_or_default();
            return Err(TaskError::Execution(Error::Timeout { name, limit }.into()));
        }
    };
    fs.read_exit_code(job.work_dir)
        .or(status.code())
        .ok_or_else(|| TaskError::Execution(Error::MissingExitStatus(name).into()))
}

async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::warn!("unable to kill task process: {e}");
    }
}

/// Polls one submitted grid job until its completion marker appears.
struct GridWatch<'a> {
    scheduler: &'a dyn Scheduler,
    fs: &'a Fs,
    job: &'a GridJob<'a>,
    job_id: &'a str,
}

impl GridWatch<'_> {
    async fn wait(
        &self,
        timeout: Option<Duration>,
        polling: &Polling,
        token: &CancellationToken,
    ) -> Result<i32, TaskError> {
        let name = self.job.name.to_owned();
        let status_cmd = self
            .scheduler
            .queue_status_command(self.job.resources.queue.as_deref());
        let started = Timer::now();
        let mut last_seen = Timer::now();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.kill().await;
                    return Err(TaskError::Execution(Error::Killed(name).into()));
                }
                _ = tokio::time::sleep(polling.interval) => {}
            }

            if let Some(code) = self.fs.read_exit_code(self.job.work_dir) {
                return Ok(code);
            }
            if let Some(limit) = timeout.filter(|limit| started.exceeded(*limit)) {
                self.kill().await;
                return Err(TaskError::Execution(Error::Timeout { name, limit }.into()));
            }

            let statuses = match run_cmd(&status_cmd, None).await {
                Ok(out) => self.scheduler.parse_queue_status(&out.stdout),
                Err(e) => {
                    log::warn!("{}: queue status query failed: {e:#}", self.scheduler.name());
                    continue;
                }
            };
            match statuses.get(self.job_id) {
                Some(QueueStatus::Error) => {
                    self.kill().await;
                    return Err(TaskError::Execution(
                        Error::QueueError(self.job_id.to_owned()).into(),
                    ));
                }
                Some(status) if status.is_active() => {
                    log::trace!("{name}: job {} is {status}", self.job_id);
                    last_seen.reset();
                }
                // done or gone; the marker may still be on its way through a shared filesystem:
                _ if last_seen.exceeded(polling.exit_read_timeout) => {
                    return Err(TaskError::Execution(
                        Error::MissingExitStatus(name).into(),
                    ));
                }
                _ => {}
            }
        }
    }

    async fn kill(&self) {
        let argv = self.scheduler.kill_command(self.job_id);
        if let Err(e) = run_cmd(&argv, None).await {
            log::warn!("unable to kill job {}: {e:#}", self.job_id);
        }
    }
}
