use std::fmt;
use std::str::FromStr;

/// What to do when a task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ErrorStrategy {
    /// Abort the pipeline step and surface the error.
    #[default]
    Terminate,
    /// Treat the task as completed with no outputs.
    Ignore,
    /// Resubmit the same task, up to a bounded number of attempts.
    Retry,
}

impl FromStr for ErrorStrategy {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminate" => Ok(Self::Terminate),
            "ignore" => Ok(Self::Ignore),
            "retry" => Ok(Self::Retry),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminate => "terminate",
            Self::Ignore => "ignore",
            Self::Retry => "retry",
        })
    }
}

/// How input files contribute to a task's digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashMode {
    /// path, size and modification time only
    #[default]
    Standard,
    /// full file contents
    Deep,
}

/// Per-task cache setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CacheMode {
    Off,
    #[default]
    Standard,
    Deep,
}

impl CacheMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Hash mode used to compute the digest. A disabled cache still needs a
    /// digest to name the working directory, so it hashes in standard mode.
    pub fn hash_mode(&self) -> HashMode {
        match self {
            Self::Deep => HashMode::Deep,
            _ => HashMode::Standard,
        }
    }
}

impl FromStr for CacheMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "false" | "off" => Ok(Self::Off),
            "true" | "on" | "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Standard => "standard",
            Self::Deep => "deep",
        })
    }
}
