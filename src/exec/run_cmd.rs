use std::path::Path;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::process::Command;

use super::Error;

/// What a finished helper command printed.
#[derive(Debug)]
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` to completion in `cwd`, capturing stdout and stderr.
/// Used for scheduler commands (submit, status, kill), whose output is small.
pub async fn run_cmd(argv: &[String], cwd: Option<&Path>) -> Result<CmdOutput> {
    let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
    log::debug!("running {}", argv.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to execute {program}"))?;
    let out = CmdOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    log::trace!("{program} finished with {}", out.status);
    if !out.stderr.is_empty() {
        log::trace!("{program} stderr: {}", out.stderr.trim_end());
    }
    Ok(out)
}

/// Like [`run_cmd`], but a non-zero exit status is an error.
pub async fn run_cmd_checked(argv: &[String], cwd: Option<&Path>) -> Result<CmdOutput> {
    let out = run_cmd(argv, cwd).await?;
    if !out.status.success() {
        return Err(Error::CommandFailed {
            command: argv.join(" "),
            status: out.status.code().unwrap_or(-1),
            stderr: out.stderr.trim_end().to_owned(),
        }
        .into());
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_cmd_captures_output() -> Result<()> {
        let out = run_cmd(&argv(&["sh", "-c", "echo out; echo err >&2"]), None).await?;
        assert!(out.status.success());
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_cmd_checked_fails_on_status() -> Result<()> {
        let result = run_cmd_checked(&argv(&["sh", "-c", "echo nope >&2; exit 3"]), None).await;
        let err = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CommandFailed { status: 3, .. })
        ));
        assert!(run_cmd(&[], None).await.is_err());
        Ok(())
    }
}
