use crate::backend::{
    Backend, CpuFormat, DirectiveRule as D, JobIdPattern, MemoryFormat, QueueArg, Source,
    StatusLayout, TimeFormat,
};
use crate::QueueStatus::*;

/// All built-in backends, looked up by name.
pub static BACKENDS: [&Backend; 4] = [&SGE, &LSF, &SLURM, &PBS];

/// Sun/Open/Univa grid engine.
pub static SGE: Backend = Backend {
    name: "sge",
    prefix: "#$",
    submit: "qsub",
    kill: "qdel",
    status: &["qstat"],
    status_queue: QueueArg::Flag("-q"),
    directives: &[
        D::new("-wd", Source::WorkDir),
        D::new("-N", Source::JobName),
        D::new("-o", Source::LogFile),
        D::new("-j", Source::Literal("y")),
        D::new("-terse", Source::Bare),
        D::new("-V", Source::Bare),
        D::new("-notify", Source::Bare),
        D::new("-q", Source::Queue),
        D::new("-pe", Source::ParallelEnv { default: "smp" }),
        D::new(
            "-l",
            Source::Time {
                prefix: "h_rt=",
                format: TimeFormat::Hms,
            },
        ),
        D::new(
            "-l",
            Source::Memory {
                prefix: "h_rss=",
                format: MemoryFormat::Compact,
            },
        ),
        D::new("", Source::ClusterOptions),
    ],
    job_id: &[JobIdPattern::After("Your job "), JobIdPattern::Bare],
    layout: StatusLayout {
        header_lines: 2,
        id_col: 0,
        status_col: 4,
    },
    codes: &[
        ("r", Running),
        ("R", Running),
        ("Rr", Running),
        ("t", Running),
        ("dr", Running),
        ("qw", Pending),
        ("Rq", Pending),
        ("hqw", Hold),
        ("hRwq", Hold),
        ("s", Hold),
        ("S", Hold),
        ("T", Hold),
        ("Eqw", Error),
        ("E", Error),
    ],
    fallback: Pending,
    max_job_name: None,
};

/// IBM Platform LSF.
pub static LSF: Backend = Backend {
    name: "lsf",
    prefix: "#BSUB",
    submit: "bsub",
    kill: "bkill",
    status: &["bjobs", "-w"],
    status_queue: QueueArg::Flag("-q"),
    directives: &[
        D::new("-cwd", Source::WorkDir),
        D::new("-J", Source::JobName),
        D::new("-o", Source::LogFile),
        D::new("-q", Source::Queue),
        D::new("-n", Source::Cpus(CpuFormat::Plain)),
        D::new("-R", Source::MultiCpu("span[hosts=1]")),
        D::new(
            "-W",
            Source::Time {
                prefix: "",
                format: TimeFormat::Hm,
            },
        ),
        D::new(
            "-M",
            Source::Memory {
                prefix: "",
                format: MemoryFormat::Mega,
            },
        ),
        D::new("", Source::ClusterOptions),
    ],
    job_id: &[JobIdPattern::Between("Job <", '>')],
    layout: StatusLayout {
        header_lines: 1,
        id_col: 0,
        status_col: 2,
    },
    codes: &[
        ("PEND", Pending),
        ("WAIT", Pending),
        ("PROV", Pending),
        ("RUN", Running),
        ("PSUSP", Hold),
        ("USUSP", Hold),
        ("SSUSP", Hold),
        ("DONE", Done),
        ("EXIT", Error),
        ("UNKWN", Error),
        ("ZOMBI", Error),
    ],
    fallback: Pending,
    max_job_name: None,
};

/// SLURM workload manager.
pub static SLURM: Backend = Backend {
    name: "slurm",
    prefix: "#SBATCH",
    submit: "sbatch",
    kill: "scancel",
    status: &["squeue", "--noheader", "-o", "%i %t", "-t", "all"],
    status_queue: QueueArg::Flag("-p"),
    directives: &[
        D::new("-D", Source::WorkDir),
        D::new("-J", Source::JobName),
        D::new("-o", Source::LogFile),
        D::new("--no-requeue", Source::Bare),
        D::new("-p", Source::Queue),
        D::new("-c", Source::Cpus(CpuFormat::Plain)),
        D::new(
            "-t",
            Source::Time {
                prefix: "",
                format: TimeFormat::Hms,
            },
        ),
        D::new(
            "--mem",
            Source::Memory {
                prefix: "",
                format: MemoryFormat::Mega,
            },
        ),
        D::new("", Source::ClusterOptions),
    ],
    job_id: &[JobIdPattern::After("Submitted batch job ")],
    layout: StatusLayout {
        header_lines: 0,
        id_col: 0,
        status_col: 1,
    },
    codes: &[
        ("PD", Pending),
        ("CF", Pending),
        ("RQ", Pending),
        ("RS", Pending),
        ("R", Running),
        ("CG", Running),
        ("SO", Running),
        ("S", Hold),
        ("ST", Hold),
        ("RH", Hold),
        ("CD", Done),
        ("CA", Error),
        ("F", Error),
        ("NF", Error),
        ("TO", Error),
        ("PR", Error),
        ("BF", Error),
        ("OOM", Error),
        ("DL", Error),
    ],
    fallback: Pending,
    max_job_name: None,
};

/// PBS / Torque.
pub static PBS: Backend = Backend {
    name: "pbs",
    prefix: "#PBS",
    submit: "qsub",
    kill: "qdel",
    status: &["qstat"],
    status_queue: QueueArg::Positional,
    directives: &[
        D::new("-d", Source::WorkDir),
        D::new("-N", Source::JobName),
        D::new("-o", Source::LogFile),
        D::new("-j", Source::Literal("oe")),
        D::new("-q", Source::Queue),
        D::new("-l", Source::Cpus(CpuFormat::Wrapped("nodes=1:ppn=", ""))),
        D::new(
            "-l",
            Source::Time {
                prefix: "walltime=",
                format: TimeFormat::Hms,
            },
        ),
        D::new(
            "-l",
            Source::Memory {
                prefix: "mem=",
                format: MemoryFormat::LowerBytes,
            },
        ),
        D::new("", Source::ClusterOptions),
    ],
    job_id: &[JobIdPattern::Qualified],
    layout: StatusLayout {
        header_lines: 2,
        id_col: 0,
        status_col: 4,
    },
    codes: &[
        ("Q", Pending),
        ("W", Pending),
        ("R", Running),
        ("E", Running),
        ("T", Running),
        ("B", Running),
        ("H", Hold),
        ("S", Hold),
        ("U", Hold),
        ("C", Done),
        ("F", Done),
    ],
    fallback: Pending,
    // PBS rejects job names longer than 15 characters:
    max_job_name: Some(15),
};
