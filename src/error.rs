use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything that can stop the pipeline. None of these are recovered from.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to launch {tool}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}")]
    ToolFailed { tool: String, status: ExitStatus },

    #[error("proxy at {addr} did not accept connections within {timeout:?}")]
    ProxyNotReady { addr: SocketAddr, timeout: Duration },

    #[error("malformed document {}: {reason}", path.display())]
    Transform { path: PathBuf, reason: String },

    #[error("HTTP {status} for {url}: {body}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("interrupted")]
    Interrupted,

    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("YAML error")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn transform(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Transform {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
