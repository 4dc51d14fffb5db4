//! Packet capture subprocess

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::types::CaptureError;

/// How long a fresh process must survive to count as started
const STARTUP_CHECK: Duration = Duration::from_millis(150);

#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn start(
        &self,
        interface: &str,
        output: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError>;
}

#[async_trait]
pub trait CaptureProcess: Send {
    /// Exit code if the process has already exited (`Some(None)` when killed
    /// by a signal); never blocks
    fn try_exit(&mut self) -> Option<Option<i32>>;

    /// SIGINT, wait up to `grace`, then kill; returns the exit code
    async fn stop(&mut self, grace: Duration) -> Option<i32>;
}

/// Runs `tool -i <if> -w <file> <extra_args...>` (tcpdump-compatible)
pub struct TcpdumpLauncher {
    tool: String,
    extra_args: Vec<String>,
}

impl TcpdumpLauncher {
    pub fn new(tool: String, extra_args: Vec<String>) -> Self {
        Self { tool, extra_args }
    }

    fn args(&self, interface: &str, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            interface.to_string(),
            "-w".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl CaptureLauncher for TcpdumpLauncher {
    async fn start(
        &self,
        interface: &str,
        output: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::SubprocessStartFailed(e.to_string()))?;
        }

        let args = self.args(interface, output);
        info!("Starting capture: {} {}", self.tool, args.join(" "));

        let mut child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::SubprocessStartFailed(format!("{}: {}", self.tool, e))
            })?;

        let mut stderr = child.stderr.take().map(BufReader::new);

        // Bad interface or missing privileges make tcpdump exit right away
        tokio::time::sleep(STARTUP_CHECK).await;
        if let Ok(Some(status)) = child.try_wait() {
            let mut message = format!("{} exited with {}", self.tool, status);
            if let Some(reader) = stderr.as_mut() {
                let mut line = String::new();
                if reader.read_line(&mut line).await.is_ok() && !line.trim().is_empty() {
                    message = format!("{}: {}", message, line.trim());
                }
            }
            return Err(CaptureError::SubprocessStartFailed(message));
        }

        if let Some(reader) = stderr {
            let tool = self.tool.clone();
            tokio::spawn(async move {
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", tool, line);
                }
            });
        }

        debug!("Capture started with PID {:?}", child.id());
        Ok(Box::new(ChildCapture { child }))
    }
}

struct ChildCapture {
    child: Child,
}

#[async_trait]
impl CaptureProcess for ChildCapture {
    fn try_exit(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                warn!("Cannot poll capture process: {}", e);
                None
            }
        }
    }

    async fn stop(&mut self, grace: Duration) -> Option<i32> {
        if let Some(code) = self.try_exit() {
            return code;
        }

        // SIGINT lets tcpdump flush its buffer and close the file cleanly
        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                warn!("SIGINT to capture process failed: {}", e);
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!("Waiting for capture process failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Capture process ignored SIGINT for {:?}, killing", grace);
                let _ = self.child.kill().await;
                self.child.wait().await.ok().and_then(|s| s.code())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args() {
        let launcher = TcpdumpLauncher::new("tcpdump".into(), vec!["-n".into()]);
        assert_eq!(
            launcher.args("usb0", Path::new("/out/captures/USB_1.pcap")),
            vec!["-i", "usb0", "-w", "/out/captures/USB_1.pcap", "-n"]
        );
    }

    #[tokio::test]
    async fn test_missing_tool_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let launcher = TcpdumpLauncher::new("/nonexistent/tcpdump".into(), vec![]);
        let err = launcher
            .start("usb0", &dir.path().join("x.pcap"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "subprocess_start_failed");
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_running_process() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut capture = ChildCapture { child };
        assert_eq!(capture.try_exit(), None);

        let started = std::time::Instant::now();
        // Terminated by SIGINT, so no exit code
        assert_eq!(capture.stop(Duration::from_secs(5)).await, None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(capture.try_exit(), Some(None));
    }
}
