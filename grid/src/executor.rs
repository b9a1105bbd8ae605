use std::fmt;
use std::path::Path;

use config::ResourceSpec;
use util::{format_hm, format_hms, HashMap};

use crate::backend::{
    Backend, CpuFormat, DirectiveRule, JobIdPattern, MemoryFormat, QueueArg, Source, TimeFormat,
};
use crate::{Error, QueueStatus, JOB_NAME_PREFIX, LOG_FILE};

/// The parts of a task a scheduler needs to know about.
#[derive(Debug, Clone, Copy)]
pub struct GridJob<'a> {
    /// process name, used to derive the job name
    pub name: &'a str,
    pub work_dir: &'a Path,
    pub resources: &'a ResourceSpec,
}

/// Capabilities every batch scheduler integration provides.
pub trait Scheduler: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Directive block placed at the top of the job script.
    fn headers(&self, job: &GridJob) -> String;

    /// Submit program, directive flags, then the script's bare file name.
    fn submit_command_line(&self, job: &GridJob, script: &Path) -> Vec<String>;

    /// Extract the job id from the submit program's stdout.
    fn parse_job_id(&self, text: &str) -> Result<String, Error>;

    fn kill_command(&self, job_id: &str) -> Vec<String>;

    /// List all jobs, or only those in `queue`.
    fn queue_status_command(&self, queue: Option<&str>) -> Vec<String>;

    /// Map job ids to their status. Lines that don't fit the listing's shape are skipped.
    fn parse_queue_status(&self, text: &str) -> HashMap<String, QueueStatus>;
}

/// A rendered directive: a flag and its argument tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub flag: &'static str,
    pub args: Vec<String>,
    /// args are a filesystem path, quoted in the script header when needed
    pub path: bool,
}

impl Directive {
    fn new(flag: &'static str, args: Vec<String>) -> Self {
        Self {
            flag,
            args,
            path: false,
        }
    }

    fn path(flag: &'static str, path: &Path) -> Self {
        Self {
            flag,
            args: vec![path.display().to_string()],
            path: true,
        }
    }
}

/// Scheduler integration driven entirely by a [`Backend`] table.
#[derive(Debug, Clone, Copy)]
pub struct GridExecutor {
    backend: &'static Backend,
}

impl GridExecutor {
    pub fn new(backend: &'static Backend) -> Self {
        Self { backend }
    }

    /// Select a built-in backend by name (case-insensitive).
    pub fn by_name(name: &str) -> Result<Self, Error> {
        Backend::by_name(name)
            .map(Self::new)
            .ok_or_else(|| Error::UnknownBackend(name.to_owned()))
    }

    /// Job name: fixed prefix plus the process name, restricted to characters
    /// every scheduler accepts.
    pub fn job_name(&self, name: &str) -> String {
        let mut job_name = String::with_capacity(JOB_NAME_PREFIX.len() + name.len());
        job_name.push_str(JOB_NAME_PREFIX);
        job_name.extend(name.chars().map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        }));
        if let Some(max) = self.backend.max_job_name {
            job_name.truncate(max);
        }
        job_name
    }

    /// Render every applicable directive, in table order.
    pub fn directives(&self, job: &GridJob) -> Vec<Directive> {
        self.backend
            .directives
            .iter()
            .filter_map(|rule| self.render(rule, job))
            .collect()
    }

    fn render(&self, rule: &DirectiveRule, job: &GridJob) -> Option<Directive> {
        let res = job.resources;
        let cpus = res.cpus_or_one();
        let flag = rule.flag;
        let directive = match rule.source {
            Source::WorkDir => Directive::path(flag, job.work_dir),
            Source::JobName => Directive::new(flag, vec![self.job_name(job.name)]),
            Source::LogFile => Directive::path(flag, &job.work_dir.join(LOG_FILE)),
            Source::Literal(value) => Directive::new(flag, vec![value.to_owned()]),
            Source::Bare => Directive::new(flag, Vec::with_capacity(0)),
            Source::Queue => Directive::new(flag, vec![res.queue.clone()?]),
            Source::Cpus(format) if cpus > 1 => {
                let value = match format {
                    CpuFormat::Plain => cpus.to_string(),
                    CpuFormat::Wrapped(pre, post) => format!("{pre}{cpus}{post}"),
                };
                Directive::new(flag, vec![value])
            }
            Source::ParallelEnv { default } if cpus > 1 => {
                let penv = res.penv.as_deref().unwrap_or(default);
                Directive::new(flag, vec![penv.to_owned(), cpus.to_string()])
            }
            Source::MultiCpu(value) if cpus > 1 => Directive::new(flag, vec![value.to_owned()]),
            Source::Cpus(_) | Source::ParallelEnv { .. } | Source::MultiCpu(_) => return None,
            Source::Time { prefix, format } => {
                let time = res.time?;
                let value = match format {
                    TimeFormat::Hms => format_hms(time),
                    TimeFormat::Hm => format_hm(time),
                };
                Directive::new(flag, vec![format!("{prefix}{value}")])
            }
            Source::Memory { prefix, format } => {
                let memory = res.memory?;
                let value = match format {
                    MemoryFormat::Compact => memory.compact(),
                    MemoryFormat::Mega => memory.to_mega().to_string(),
                    MemoryFormat::LowerBytes => format!("{}b", memory.compact().to_lowercase()),
                };
                Directive::new(flag, vec![format!("{prefix}{value}")])
            }
            Source::ClusterOptions => {
                let opts = res.cluster_options.as_deref()?;
                let args: Vec<String> = opts.split_whitespace().map(str::to_owned).collect();
                if args.is_empty() {
                    return None;
                }
                Directive::new(flag, args)
            }
        };
        Some(directive)
    }
}

impl Scheduler for GridExecutor {
    fn name(&self) -> &str {
        self.backend.name
    }

    fn headers(&self, job: &GridJob) -> String {
        let mut headers = String::with_capacity(512);
        for directive in self.directives(job) {
            headers.push_str(self.backend.prefix);
            if !directive.flag.is_empty() {
                headers.push(' ');
                headers.push_str(directive.flag);
            }
            for arg in &directive.args {
                headers.push(' ');
                if directive.path && arg.contains(char::is_whitespace) {
                    headers.push('"');
                    headers.push_str(arg);
                    headers.push('"');
                } else {
                    headers.push_str(arg);
                }
            }
            headers.push('\n');
        }
        headers
    }

    fn submit_command_line(&self, job: &GridJob, script: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(32);
        argv.push(self.backend.submit.to_owned());
        for directive in self.directives(job) {
            if !directive.flag.is_empty() {
                argv.push(directive.flag.to_owned());
            }
            argv.extend(directive.args);
        }
        let script_name = script.file_name().unwrap_or(script.as_os_str());
        argv.push(script_name.to_string_lossy().into_owned());
        argv
    }

    fn parse_job_id(&self, text: &str) -> Result<String, Error> {
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            for pattern in self.backend.job_id {
                if let Some(id) = match_job_id(pattern, line) {
                    log::debug!("{}: job id {id} from submit response", self.backend.name);
                    return Ok(id.to_owned());
                }
            }
        }
        Err(Error::IllegalResponse {
            backend: self.backend.name.to_owned(),
            response: text.to_owned(),
        })
    }

    fn kill_command(&self, job_id: &str) -> Vec<String> {
        vec![self.backend.kill.to_owned(), job_id.to_owned()]
    }

    fn queue_status_command(&self, queue: Option<&str>) -> Vec<String> {
        let mut argv: Vec<String> = self.backend.status.iter().map(|s| s.to_string()).collect();
        if let Some(queue) = queue {
            if let QueueArg::Flag(flag) = self.backend.status_queue {
                argv.push(flag.to_owned());
            }
            argv.push(queue.to_owned());
        }
        argv
    }

    fn parse_queue_status(&self, text: &str) -> HashMap<String, QueueStatus> {
        let layout = &self.backend.layout;
        let mut statuses = HashMap::default();
        for line in text.lines().skip(layout.header_lines) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let cols: Vec<&str> = line.split_whitespace().collect();
            match (cols.get(layout.id_col), cols.get(layout.status_col)) {
                (Some(id), Some(code)) if id.starts_with(|c: char| c.is_ascii_digit()) => {
                    statuses.insert(id.to_string(), self.backend.decode(code));
                }
                _ => log::warn!(
                    "{}: skipping unrecognized queue status line: {line}",
                    self.backend.name
                ),
            }
        }
        statuses
    }
}

/// Leading run of ascii digits, if any.
fn leading_digits(s: &str) -> Option<&str> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}

fn match_job_id<'a>(pattern: &JobIdPattern, line: &'a str) -> Option<&'a str> {
    match *pattern {
        JobIdPattern::After(phrase) => {
            let start = line.find(phrase)? + phrase.len();
            leading_digits(&line[start..])
        }
        JobIdPattern::Between(open, close) => {
            let start = line.find(open)? + open.len();
            let rest = &line[start..];
            let id = &rest[..rest.find(close)?];
            leading_digits(id).filter(|digits| digits.len() == id.len())
        }
        JobIdPattern::Bare => leading_digits(line).filter(|digits| digits.len() == line.len()),
        JobIdPattern::Qualified => {
            let digits = leading_digits(line)?;
            let server = &line[digits.len()..];
            let qualified = server.is_empty()
                || (server.len() > 1
                    && server.starts_with('.')
                    && !server.contains(char::is_whitespace));
            qualified.then_some(line)
        }
    }
}
