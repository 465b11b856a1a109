//! Environment-driven configuration.
//!
//! Everything the pipeline needs comes from environment variables (a `.env`
//! file is loaded by `main` first). Tokens and proxy settings are validated
//! on demand so the post-processing passes run without them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{PipelineError, Result};

pub const DEFAULT_BASE_URI: &str = "https://api.uexcorp.space/2.0";
pub const DEFAULT_DOCS_URI: &str = "https://uexcorp.space/api/documentation/";

const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_PROXY_READY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_token: String,
    pub user_token: Option<String>,
}

/// Where and how the capture proxy runs.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub addr: SocketAddr,
    pub command: String,
    pub ready_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_uri: String,
    pub docs_uri: String,
    pub docs_auth: Option<(String, String)>,
    pub skip_capture: bool,
    pub converter_command: String,
    pub capture_log: PathBuf,
    pub openapi_path: PathBuf,
    pub base_spec_path: PathBuf,
    pub catalog_path: PathBuf,
    pub cache_dir: PathBuf,
    app_token: Option<String>,
    user_token: Option<String>,
    proxy_addr: Option<String>,
    proxy_command: Option<String>,
    proxy_ready_timeout: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str, default: &str| {
            PathBuf::from(var(key).unwrap_or_else(|| default.to_string()))
        };

        let docs_auth = match (var("DOCS_USER"), var("DOCS_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            (Some(user), None) => Some((user, String::new())),
            _ => None,
        };

        Ok(Self {
            base_uri: var("BASE_URI")
                .map(|uri| uri.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URI.to_string()),
            docs_uri: var("DOCS_URI").unwrap_or_else(|| DEFAULT_DOCS_URI.to_string()),
            docs_auth,
            skip_capture: var("SKIP_CAPTURE").is_some_and(|v| is_truthy(&v)),
            converter_command: var("CONVERTER_COMMAND")
                .unwrap_or_else(|| "mitmproxy2swagger".to_string()),
            capture_log: path("CAPTURE_LOG", "data/capture/flows"),
            openapi_path: path("OPENAPI_FILE", "openapi.yaml"),
            base_spec_path: path("BASE_SPEC_FILE", "data/openapi.base.yaml"),
            catalog_path: path("CATALOG_FILE", "data/endpoints.yaml"),
            cache_dir: path("CACHE_DIR", "data/cache"),
            app_token: var("APP_TOKEN"),
            user_token: var("USER_TOKEN"),
            proxy_addr: var("PROXY_ADDR"),
            proxy_command: var("PROXY_COMMAND"),
            proxy_ready_timeout: var("PROXY_READY_TIMEOUT"),
        })
    }

    /// Parses the capture proxy settings. Only a capturing run needs them.
    pub fn proxy(&self) -> Result<ProxySettings> {
        let addr = self.proxy_addr.as_deref().unwrap_or(DEFAULT_PROXY_ADDR);
        let addr: SocketAddr = addr.parse().map_err(|_| {
            PipelineError::Config(format!("PROXY_ADDR is not a socket address: {}", addr))
        })?;

        let ready_timeout = match &self.proxy_ready_timeout {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                PipelineError::Config(format!(
                    "PROXY_READY_TIMEOUT must be a number of seconds, got {}",
                    raw
                ))
            })?,
            None => DEFAULT_PROXY_READY_TIMEOUT_SECS,
        };

        Ok(ProxySettings {
            addr,
            command: self
                .proxy_command
                .clone()
                .unwrap_or_else(|| "mitmdump".to_string()),
            ready_timeout: Duration::from_secs(ready_timeout),
        })
    }

    /// Validates the API tokens. A missing application token is fatal, a
    /// missing user token only disables user-bound endpoints.
    pub fn credentials(&self) -> Result<Credentials> {
        let app_token = self.app_token.clone().ok_or_else(|| {
            PipelineError::Config("APP_TOKEN not found in environment variables".to_string())
        })?;

        if self.user_token.is_none() {
            warn!("USER_TOKEN not set, user-bound endpoints will be skipped");
        }

        Ok(Credentials {
            app_token,
            user_token: self.user_token.clone(),
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
