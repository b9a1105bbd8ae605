use std::path::{Path, PathBuf};

use super::Fs;

/// The task script, as written by the user.
pub const COMMAND_SH: &str = ".command.sh";
/// Wrapper that sets up the environment, runs `.command.sh` and records its exit status.
pub const COMMAND_RUN: &str = ".command.run";
/// Completion marker holding the exit status of `.command.sh`.
pub const EXIT_CODE: &str = ".exitcode";
pub const COMMAND_OUT: &str = ".command.out";
pub const COMMAND_ERR: &str = ".command.err";

/// Utility fns for making common paths inside a task work dir.
impl Fs {
    /// $WORK/ab/cdef.../.command.sh
    pub fn command_sh<'a>(&self, work_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(work_dir, COMMAND_SH, buf)
    }

    /// $WORK/ab/cdef.../.command.run
    pub fn command_run<'a>(&self, work_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(work_dir, COMMAND_RUN, buf)
    }

    /// $WORK/ab/cdef.../.exitcode
    pub fn exit_code<'a>(&self, work_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(work_dir, EXIT_CODE, buf)
    }

    fn parts2<'a, T, U>(&self, p1: T, p2: U, buf: &'a mut PathBuf) -> &'a Path
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        buf.clear();
        buf.push(p1);
        buf.push(p2);
        &*buf
    }
}
