use std::borrow::Cow;
use std::path::Path;

use crate::fs::{COMMAND_ERR, COMMAND_OUT, COMMAND_SH, EXIT_CODE};

/// Interpreter used when a task script doesn't name one.
pub const DEFAULT_INTERPRETER: &str = "/bin/bash -ue";

/// The interpreter named on a script's `#!` line, if it has one.
pub fn fetch_interpreter(script: &str) -> Option<&str> {
    let first = script.lines().next()?;
    let interpreter = first.strip_prefix("#!")?.trim();
    if interpreter.is_empty() {
        None
    } else {
        Some(interpreter)
    }
}

/// Contents of `.command.sh`: the script itself, with the default
/// interpreter line added when it has none.
pub fn command_sh(script: &str) -> Cow<'_, str> {
    if fetch_interpreter(script).is_some() {
        Cow::Borrowed(script)
    } else {
        Cow::Owned(format!("#!{DEFAULT_INTERPRETER}\n{script}"))
    }
}

/// Utility for building the contents of a `.command.run` wrapper.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
#[derive(Debug)]
pub struct LauncherBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> LauncherBuilder<'a> {
    pub fn new(strbuf: &'a mut String) -> Self {
        Self { strbuf }
    }
}

impl LauncherBuilder<'_> {
    /// shebang line. The wrapper must not use `-e`, or a failing
    /// task would stop it before the exit status is recorded.
    pub fn write_prefix(&mut self, task_name: &str) {
        self.strbuf.clear();
        self.strbuf.push_str("#!/bin/bash\n");
        self.strbuf.push_str("# taskgrid launcher for '");
        self.strbuf.push_str(task_name);
        self.strbuf.push_str("'\n");
    }

    /// scheduler directives; must come before any command
    pub fn write_headers(&mut self, headers: &str) {
        self.strbuf.push_str(headers);
    }

    /// a single exported variable
    pub fn write_export(&mut self, name: &str, value: &str) {
        self.strbuf.push_str("export ");
        self.strbuf.push_str(name);
        self.strbuf.push('=');
        push_quoted(self.strbuf, value);
        self.strbuf.push('\n');
    }

    pub fn write_modules(&mut self, modules: &[String]) {
        if modules.is_empty() {
            return;
        }
        self.strbuf.push_str("module load");
        for module in modules {
            self.strbuf.push(' ');
            push_quoted(self.strbuf, module);
        }
        self.strbuf.push('\n');
    }

    pub fn write_cd(&mut self, work_dir: &Path) {
        self.strbuf.push_str("\ncd ");
        push_quoted(self.strbuf, &work_dir.to_string_lossy());
        self.strbuf.push('\n');
    }

    /// run `.command.sh`, capture its output and record its exit status.
    pub fn write_run(&mut self, interpreter: &str, container: Option<&str>) {
        self.strbuf.push_str("rm -f ");
        self.strbuf.push_str(EXIT_CODE);
        self.strbuf.push('\n');
        if let Some(image) = container {
            self.strbuf
                .push_str("docker run --rm -v \"$PWD\":\"$PWD\" -w \"$PWD\" ");
            push_quoted(self.strbuf, image);
            self.strbuf.push(' ');
        }
        self.strbuf.push_str(interpreter);
        self.strbuf.push(' ');
        self.strbuf.push_str(COMMAND_SH);
        self.strbuf.push_str(" > ");
        self.strbuf.push_str(COMMAND_OUT);
        self.strbuf.push_str(" 2> ");
        self.strbuf.push_str(COMMAND_ERR);
        self.strbuf.push('\n');
        self.strbuf.push_str("status=$?\nprintf '%s' \"$status\" > ");
        self.strbuf.push_str(EXIT_CODE);
        self.strbuf.push_str("\nexit $status\n");
    }
}

/// Single-quote `value` for the shell.
fn push_quoted(buf: &mut String, value: &str) {
    buf.push('\'');
    buf.push_str(&value.replace('\'', r"'\''"));
    buf.push('\'');
}
