use crate::{QueueStatus, BACKENDS};

/// Everything that distinguishes one batch scheduler from another.
#[derive(Debug)]
pub struct Backend {
    /// name used to select the backend in configuration
    pub name: &'static str,
    /// marker that starts a directive line in the job script (`#SBATCH`)
    pub prefix: &'static str,
    pub submit: &'static str,
    pub kill: &'static str,
    /// base argv of the queue listing command
    pub status: &'static [&'static str],
    /// how a queue name is added to the status command
    pub status_queue: QueueArg,
    /// directives, in the order they are rendered
    pub directives: &'static [DirectiveRule],
    /// job-id shapes accepted in the submit response, tried in order
    pub job_id: &'static [JobIdPattern],
    pub layout: StatusLayout,
    /// status codes as printed by the scheduler
    pub codes: &'static [(&'static str, QueueStatus)],
    /// status for codes missing from `codes`
    pub fallback: QueueStatus,
    /// some schedulers truncate long job names
    pub max_job_name: Option<usize>,
}

impl Backend {
    /// Look up a built-in backend by name (case-insensitive).
    pub fn by_name(name: &str) -> Option<&'static Backend> {
        BACKENDS
            .iter()
            .copied()
            .find(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// Map a raw status code to a `QueueStatus`.
    pub fn decode(&self, code: &str) -> QueueStatus {
        self.codes
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, status)| *status)
            .unwrap_or_else(|| {
                log::debug!(
                    "{}: unknown status code '{code}', using {}",
                    self.name,
                    self.fallback
                );
                self.fallback
            })
    }
}

/// One directive: a flag plus the job property its value comes from.
/// An empty flag renders the value alone.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveRule {
    pub flag: &'static str,
    pub source: Source,
}

impl DirectiveRule {
    pub const fn new(flag: &'static str, source: Source) -> Self {
        Self { flag, source }
    }
}

/// Where a directive's value comes from. Every source except `Literal` and
/// `Bare` is skipped when the job doesn't set the corresponding resource.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    WorkDir,
    JobName,
    /// the scheduler log file inside the work dir
    LogFile,
    /// fixed value, always emitted
    Literal(&'static str),
    /// flag without a value, always emitted
    Bare,
    Queue,
    /// cpu count, only when more than one cpu is requested
    Cpus(CpuFormat),
    /// `<penv> <cpus>`, only when more than one cpu is requested
    ParallelEnv { default: &'static str },
    /// fixed value, only when more than one cpu is requested
    MultiCpu(&'static str),
    Time { prefix: &'static str, format: TimeFormat },
    Memory { prefix: &'static str, format: MemoryFormat },
    /// free-form options, always last
    ClusterOptions,
}

#[derive(Debug, Clone, Copy)]
pub enum CpuFormat {
    Plain,
    /// count wrapped in literal text, e.g. `nodes=1:ppn=` + `4`
    Wrapped(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum TimeFormat {
    /// `HH:mm:ss`
    Hms,
    /// `HH:mm`
    Hm,
}

#[derive(Debug, Clone, Copy)]
pub enum MemoryFormat {
    /// `4G`, `512M`
    Compact,
    /// whole mebibytes, no unit
    Mega,
    /// `4gb`, `512mb`
    LowerBytes,
}

/// Recognisable job-id shapes in a submit response.
#[derive(Debug, Clone, Copy)]
pub enum JobIdPattern {
    /// digits right after a literal phrase: `Submitted batch job 42`
    After(&'static str),
    /// digits between a literal opening and a closing char: `Job <42>`
    Between(&'static str, char),
    /// a line holding nothing but digits
    Bare,
    /// digits optionally qualified with a server name: `42.head-node`
    Qualified,
}

/// Column layout of a queue listing.
#[derive(Debug, Clone, Copy)]
pub struct StatusLayout {
    /// leading lines to ignore
    pub header_lines: usize,
    pub id_col: usize,
    pub status_col: usize,
}

/// How the status command is narrowed to a single queue.
#[derive(Debug, Clone, Copy)]
pub enum QueueArg {
    Flag(&'static str),
    Positional,
}
