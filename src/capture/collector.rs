//! Full-collection workflow launched on new connections

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

pub trait CollectionTrigger: Send + Sync {
    /// Start the collection for `case_id` without waiting for it
    fn trigger(&self, case_id: &str, output_dir: &Path) -> Result<(), String>;
}

/// Runs the configured command with `{case_id}` and `{output_dir}` substituted
pub struct CommandTrigger {
    command: Vec<String>,
}

impl CommandTrigger {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn render(&self, case_id: &str, output_dir: &Path) -> Vec<String> {
        let output_dir = output_dir.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{case_id}", case_id)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

impl CollectionTrigger for CommandTrigger {
    fn trigger(&self, case_id: &str, output_dir: &Path) -> Result<(), String> {
        let argv = self.render(case_id, output_dir);
        let Some((program, args)) = argv.split_first() else {
            return Err("collection command is empty".to_string());
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", program, e))?;
        info!("Collection started for {} (PID {:?})", case_id, child.id());

        let case_id = case_id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!("Collection for {} finished", case_id),
                Ok(status) => warn!("Collection for {} exited with {}", case_id, status),
                Err(e) => warn!("Collection for {} failed: {}", case_id, e),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        let trigger = CommandTrigger::new(vec![
            "vivisect".into(),
            "--case-id".into(),
            "{case_id}".into(),
            "--output={output_dir}".into(),
        ]);
        assert_eq!(
            trigger.render("USB_20260101_120000", Path::new("/srv/out")),
            vec![
                "vivisect",
                "--case-id",
                "USB_20260101_120000",
                "--output=/srv/out"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_command() {
        let trigger = CommandTrigger::new(vec![]);
        assert!(trigger.trigger("x", Path::new("/tmp")).is_err());
        let trigger = CommandTrigger::new(vec!["true".into()]);
        assert!(trigger.trigger("x", Path::new("/tmp")).is_ok());
    }
}
