//! Converts a capture log into a draft OpenAPI document with the external
//! converter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::error::{PipelineError, Result};

pub struct SpecSynthesizer {
    command: String,
    capture_log: PathBuf,
    output: PathBuf,
    base_uri: String,
}

impl SpecSynthesizer {
    pub fn new(command: &str, capture_log: &Path, output: &Path, base_uri: &str) -> Self {
        Self {
            command: command.to_string(),
            capture_log: capture_log.to_path_buf(),
            output: output.to_path_buf(),
            base_uri: base_uri.to_string(),
        }
    }

    pub fn arguments(&self, with_examples: bool) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.capture_log.display().to_string(),
            "-o".to_string(),
            self.output.display().to_string(),
            "-p".to_string(),
            self.base_uri.clone(),
            "-f".to_string(),
            "flow".to_string(),
        ];
        if with_examples {
            args.push("--examples".to_string());
        }
        args
    }

    /// Runs the converter to completion. The converter updates the output
    /// file in place when it already exists.
    pub async fn synthesize(&self, with_examples: bool) -> Result<()> {
        info!(
            command = %self.command,
            output = %self.output.display(),
            with_examples,
            "running converter"
        );
        let status = Command::new(&self.command)
            .args(self.arguments(with_examples))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| PipelineError::ToolLaunch {
                tool: self.command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(PipelineError::ToolFailed {
                tool: self.command.clone(),
                status,
            });
        }
        Ok(())
    }
}
