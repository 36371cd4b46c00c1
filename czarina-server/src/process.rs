//! Running external tools (tmux, git) with a timeout

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

use czarina_core::Error;

/// Default limit for a single tmux or git invocation
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `program args...`, returning stdout on success
///
/// A non-zero exit, a spawn failure or a timeout is a collaborator error
/// named after `operation`.
pub async fn run(
    operation: &str,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    limit: Duration,
) -> czarina_core::Result<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    trace!("{}: {} {:?}", operation, program, args);

    let output = tokio::time::timeout(limit, command.output())
        .await
        .map_err(|_| {
            Error::collaborator(
                operation,
                format!("{} timed out after {}s", program, limit.as_secs()),
            )
        })?
        .map_err(|e| Error::collaborator(operation, format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::collaborator(
            operation,
            format!("{} exited with {}: {}", program, output.status, stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
