use clap::{ArgAction, Parser};

const CMD_NAME: &str = "tg";
const DEFAULT_WORK_DIR: &str = "work";
const DEFAULT_EXECUTOR: &str = "local";

/// Stores our command-line args format.
#[derive(Parser, Debug, Default)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Task script to run
    #[arg(value_name = "SCRIPT")]
    pub script: String,

    /// Work directory; task runs go in hash-named subdirectories
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_WORK_DIR)]
    #[arg(env = "TASKGRID_WORK_DIR")]
    pub work_dir: String,

    /// Where to run: local, sge, lsf, slurm or pbs
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_EXECUTOR)]
    #[arg(env = "TASKGRID_EXECUTOR")]
    pub executor: String,

    /// Process name (default: script file stem)
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,

    /// Scalar input
    #[arg(long = "val", value_name = "NAME=VALUE")]
    pub vals: Vec<String>,

    /// File input, staged under PATTERN
    #[arg(long = "file", value_name = "PATTERN=PATH[,PATH..]")]
    pub files: Vec<String>,

    /// Declared output; a pattern with a wildcard collects every match
    #[arg(short, long = "output", value_name = "PATTERN")]
    pub outputs: Vec<String>,

    /// Resource directive, e.g. 'memory=4 GB' or 'error_strategy=retry'
    #[arg(short = 'D', long = "directive", value_name = "KEY=VALUE")]
    pub directives: Vec<String>,

    /// Environment variable for the task
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Directory put in front of the task's PATH
    #[arg(long, value_name = "DIR")]
    pub bin_dir: Option<String>,

    /// Seconds between queue status checks
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub poll_interval: u64,

    /// Time limit for the task, e.g. '1h30m'; overrides the time directive
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Maximum number of tasks running at once
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub max_forks: usize,

    /// How inputs appear in the work dir: symlink or copy
    #[arg(long, value_name = "MODE", default_value = "symlink")]
    pub stage_mode: String,

    /// Print the task's hash-log and exit without running it
    #[arg(long)]
    pub hash_log: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
