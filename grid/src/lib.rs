//! Protocol layer between a task and a batch scheduler.
//!
//! Every supported scheduler is described by a [`Backend`] data table: the
//! literal tokens of its submit/kill/status programs, the order and format of
//! its directives, the shape of its job-id response and the meaning of its
//! queue status codes. A single [`GridExecutor`] consumes any of these tables,
//! so adding a scheduler means adding a table, not code.

/// Queue status as reported by a scheduler
mod status;
pub use status::QueueStatus;

/// Data tables describing a scheduler
mod backend;
pub use backend::{
    Backend, CpuFormat, DirectiveRule, JobIdPattern, MemoryFormat, QueueArg, Source,
    StatusLayout, TimeFormat,
};

/// Built-in scheduler tables
mod backends;
pub use backends::{BACKENDS, LSF, PBS, SGE, SLURM};

/// Generic renderer and parser over a backend table
mod executor;
pub use executor::{Directive, GridExecutor, GridJob, Scheduler};

/// File (relative to the task work dir) that receives scheduler output.
pub const LOG_FILE: &str = ".command.log";

/// Prefix for job names submitted to a scheduler.
pub const JOB_NAME_PREFIX: &str = "tg-";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown grid backend \"{0}\"")]
    UnknownBackend(String),
    #[error("Invalid {backend} submit response; no job id found in:\n{response}")]
    IllegalResponse { backend: String, response: String },
}
