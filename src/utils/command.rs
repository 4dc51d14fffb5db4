//! Running short-lived system tools (`ip`, `mount`, `mkfs.*`)

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Run `program args...` to completion
///
/// Returns stdout on exit status 0, otherwise a message carrying stderr.
pub async fn run_command(program: &str, args: &[&str]) -> Result<String, String> {
    debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {}", program, e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        ))
    }
}
