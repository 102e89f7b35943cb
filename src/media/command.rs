use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;
use crate::core::{Error, Result};

/// Resolves `program` on PATH.
pub(crate) fn locate(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| Error::ToolMissing(program.to_string()))
}

/// Runs a tool to completion, capturing its output. The child is killed if the
/// returned future is dropped.
pub(crate) async fn run<I, S>(program: &PathBuf, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program.display(), "Spawning tool");
    let output = command.output().await?;
    Ok(output)
}

/// Last few stderr lines, for error messages
pub(crate) fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}
