use std::time::Duration;

use crate::hash;

/// Task definitions and runs
mod task;
pub use task::{Cardinality, CollectedOutput, InputValue, OutputDecl, TaskDef, TaskRun, TaskStatus};

/// Writes `.command.run`
mod launcher;
pub use launcher::{command_sh, fetch_interpreter, LauncherBuilder, DEFAULT_INTERPRETER};

/// Task process environment
mod env;
pub use env::{build_environment, inherited_env};

/// Run a subprocess
mod run_cmd;

/// Local and grid execution
mod executor;
pub use executor::{Executor, Handle, Polling, LOCAL};

/// Drives tasks through caching, staging, execution and retries
mod processor;
pub use processor::{ProcessorSettings, TaskProcessor};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not submitting \"{0}\": execution was aborted")]
    Aborted(String),
    #[error("Empty command line")]
    EmptyCommand,
    #[error("Command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Task \"{name}\" exited with status {code}")]
    ExitStatus { name: String, code: i32 },
    #[error("Task \"{0}\" was killed")]
    Killed(String),
    #[error("Task \"{name}\" exceeded its time limit of {limit:?}")]
    Timeout { name: String, limit: Duration },
    #[error("Task \"{0}\" finished without writing an exit status")]
    MissingExitStatus(String),
    #[error("Scheduler reports job {0} in an error state")]
    QueueError(String),
}

/// Why a task failed, by the phase it failed in.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Unable to stage inputs")]
    Staging(#[source] anyhow::Error),
    #[error("Unable to submit task")]
    Submission(#[source] anyhow::Error),
    #[error("Task execution failed")]
    Execution(#[source] anyhow::Error),
    #[error("Unable to compute task digest")]
    Hash(#[from] hash::Error),
    #[error(transparent)]
    Other(anyhow::Error),
}

impl TaskError {
    /// True if this was a refusal to run after the run was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Other(e) if matches!(e.downcast_ref::<Error>(), Some(Error::Aborted(_))))
    }
}
