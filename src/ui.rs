use std::error::Error;
use std::fmt;
use std::time::Duration;

use colored::Colorize;

use util::format_hms;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
/// Shared between concurrently running tasks, so it holds no mutable state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
        }
    }

    /// A task attempt is starting.
    pub fn run(&self, hash_log: &str, name: &str, attempt: u32) {
        if attempt > 1 {
            eprintln!("{} [{hash_log}] {name} (attempt {attempt})", "RUN".magenta());
        } else {
            eprintln!("{} [{hash_log}] {name}", "RUN".magenta());
        }
    }

    pub fn cached(&self, hash_log: &str, name: &str) {
        eprintln!("{} [{hash_log}] {name}", "CACHED".cyan());
    }

    pub fn completed(&self, hash_log: &str, name: &str, elapsed: Duration) {
        if self.verbose {
            eprintln!(
                "{} [{hash_log}] {name} in {}",
                "COMPLETED".green(),
                format_hms(elapsed)
            );
        } else {
            eprintln!("{} [{hash_log}] {name}", "COMPLETED".green());
        }
    }

    pub fn retry(&self, hash_log: &str, name: &str, err: &dyn Error) {
        eprintln!("{} [{hash_log}] {name}: {}", "RETRY".yellow(), Chain(err));
    }

    pub fn ignored(&self, hash_log: &str, name: &str, err: &dyn Error) {
        eprintln!("{} [{hash_log}] {name}: {}", "IGNORED".yellow(), Chain(err));
    }

    pub fn failed(&self, hash_log: &str, name: &str, err: &dyn Error) {
        eprintln!("{} [{hash_log}] {name}: {}", "FAILED".red(), Chain(err));
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }
}

/// Displays an error followed by each of its sources.
struct Chain<'a>(&'a dyn Error);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
