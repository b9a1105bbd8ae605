use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use util::{format_hms, parse_duration, MemoryUnit};

use crate::{CacheMode, Error, ErrorStrategy, EXTRA_PREFIX, LIST_DELIM};

/// Names accepted by [`ResourceSpec::set`] and [`ResourceSpec::get`].
const DIRECTIVES: [&str; 12] = [
    "queue",
    "cpus",
    "memory",
    "time",
    "penv",
    "cluster_options",
    "modules",
    "container",
    "env",
    "error_strategy",
    "max_retries",
    "cache",
];

const DEFAULT_MAX_RETRIES: u32 = 1;

/// Snapshot of the directives relevant to submitting and caching one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub queue: Option<String>,
    pub cpus: Option<u32>,
    pub memory: Option<MemoryUnit>,
    pub time: Option<Duration>,
    /// parallel environment name (grid engine)
    pub penv: Option<String>,
    /// passed verbatim to the backend, after all other directives
    pub cluster_options: Option<String>,
    /// environment modules to load before running the task
    pub modules: Vec<String>,
    pub container: Option<String>,
    /// declared environment variables, in declaration order
    pub env: Vec<(String, String)>,
    pub error_strategy: ErrorStrategy,
    pub max_retries: u32,
    pub cache: CacheMode,
    /// opaque backend-specific options, keyed without the `ext.` prefix
    pub extra: BTreeMap<String, String>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            queue: None,
            cpus: None,
            memory: None,
            time: None,
            penv: None,
            cluster_options: None,
            modules: Vec::with_capacity(0),
            container: None,
            env: Vec::with_capacity(0),
            error_strategy: ErrorStrategy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            cache: CacheMode::default(),
            extra: BTreeMap::new(),
        }
    }
}

/// A directive value read back through the string-keyed accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveValue {
    Text(String),
    Count(u32),
    Memory(MemoryUnit),
    Time(Duration),
    List(Vec<String>),
    Pairs(Vec<(String, String)>),
    Strategy(ErrorStrategy),
    Cache(CacheMode),
}

impl DirectiveValue {
    /// Canonical list view; a text value is split on `:`.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            Self::Text(s) => split_list(s),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for DirectiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Count(n) => write!(f, "{n}"),
            Self::Memory(m) => write!(f, "{m}"),
            Self::Time(d) => f.write_str(&format_hms(*d)),
            Self::List(items) => f.write_str(&items.join(&LIST_DELIM.to_string())),
            Self::Pairs(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                Ok(())
            }
            Self::Strategy(s) => write!(f, "{s}"),
            Self::Cache(c) => write!(f, "{c}"),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(LIST_DELIM)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

impl ResourceSpec {
    /// True if `key` names a directive, including `ext.*` pass-through options.
    pub fn is_known(key: &str) -> bool {
        DIRECTIVES.contains(&key) || key.starts_with(EXTRA_PREFIX)
    }

    /// Assign a directive from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let invalid = || Error::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        let text = value.trim();
        match key {
            "queue" => self.queue = Some(text.to_owned()),
            "cpus" => self.cpus = Some(text.parse().map_err(|_| invalid())?),
            "memory" => self.memory = Some(text.parse()?),
            "time" => self.time = Some(parse_duration(text)?),
            "penv" => self.penv = Some(text.to_owned()),
            "cluster_options" => self.cluster_options = Some(text.to_owned()),
            "modules" => self.modules = split_list(text),
            "container" => self.container = Some(text.to_owned()),
            "env" => {
                let (k, v) = text.split_once('=').ok_or_else(invalid)?;
                self.set_env(k.trim(), v);
            }
            "error_strategy" => self.error_strategy = text.parse().map_err(|_| invalid())?,
            "max_retries" => self.max_retries = text.parse().map_err(|_| invalid())?,
            "cache" => self.cache = text.parse().map_err(|_| invalid())?,
            _ => match key.strip_prefix(EXTRA_PREFIX) {
                Some(name) if !name.is_empty() => {
                    self.extra.insert(name.to_owned(), text.to_owned());
                }
                _ => return Err(Error::UnknownDirective(key.to_owned())),
            },
        }
        log::trace!("set directive {key}={text}");
        Ok(())
    }

    /// Declare an environment variable, replacing an earlier declaration of the same name.
    pub fn set_env(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.env.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value.to_owned();
        } else {
            self.env.push((name.to_owned(), value.to_owned()));
        }
    }

    /// Lenient lookup: `None` for unknown keys and for directives that are not set.
    pub fn get(&self, key: &str) -> Option<DirectiveValue> {
        use DirectiveValue::*;
        match key {
            "queue" => self.queue.clone().map(Text),
            "cpus" => self.cpus.map(Count),
            "memory" => self.memory.map(Memory),
            "time" => self.time.map(Time),
            "penv" => self.penv.clone().map(Text),
            "cluster_options" => self.cluster_options.clone().map(Text),
            "modules" => non_empty(&self.modules).map(List),
            "container" => self.container.clone().map(Text),
            "env" => non_empty(&self.env).map(Pairs),
            "error_strategy" => Some(Strategy(self.error_strategy)),
            "max_retries" => Some(Count(self.max_retries)),
            "cache" => Some(Cache(self.cache)),
            _ => key
                .strip_prefix(EXTRA_PREFIX)
                .and_then(|name| self.extra.get(name))
                .cloned()
                .map(Text),
        }
    }

    /// Strict lookup: unknown keys and unset directives are errors.
    pub fn get_strict(&self, key: &str) -> Result<DirectiveValue, Error> {
        if !Self::is_known(key) {
            return Err(Error::UnknownDirective(key.to_owned()));
        }
        self.get(key)
            .ok_or_else(|| Error::MissingDirective(key.to_owned()))
    }

    /// Cpu count, treating an unset directive as one.
    pub fn cpus_or_one(&self) -> u32 {
        self.cpus.unwrap_or(1).max(1)
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}
