use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A running interception proxy.
///
/// Owning this value owns the process. [`shutdown`] asks it to terminate so
/// buffered flows reach the capture log, and dropping the value kills it
/// outright, so the proxy cannot outlive the pipeline on any exit path.
///
/// [`shutdown`]: CaptureProxy::shutdown
pub struct CaptureProxy {
    command: String,
    child: Child,
    addr: SocketAddr,
    stop_timeout: Duration,
}

impl CaptureProxy {
    /// Launches `command` listening on `addr` and writing flows to
    /// `capture_log`, then waits until it accepts connections.
    pub async fn start(
        command: &str,
        addr: SocketAddr,
        capture_log: &Path,
        ready_timeout: Duration,
    ) -> Result<Self> {
        if let Some(parent) = capture_log.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(%addr, log = %capture_log.display(), "starting capture proxy");
        let child = Command::new(command)
            .arg("--listen-host")
            .arg(addr.ip().to_string())
            .arg("--listen-port")
            .arg(addr.port().to_string())
            .arg("-w")
            .arg(capture_log)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::ToolLaunch {
                tool: command.to_string(),
                source,
            })?;

        let mut proxy = Self {
            command: command.to_string(),
            child,
            addr,
            stop_timeout: STOP_TIMEOUT,
        };
        proxy.wait_until_ready(ready_timeout).await?;
        Ok(proxy)
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(PipelineError::ToolFailed {
                    tool: self.command.clone(),
                    status,
                });
            }

            match TcpStream::connect(self.addr).await {
                Ok(_) => {
                    info!(addr = %self.addr, "capture proxy is accepting connections");
                    return Ok(());
                }
                Err(e) => debug!(addr = %self.addr, error = %e, "proxy not ready yet"),
            }

            if Instant::now() >= deadline {
                return Err(PipelineError::ProxyNotReady {
                    addr: self.addr,
                    timeout,
                });
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Sends SIGTERM and waits for the proxy to flush and exit. A proxy that
    /// is still running after the stop timeout is killed.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            warn!(addr = %self.addr, "capture proxy had already exited");
            return Ok(());
        }

        if self.terminate().await {
            match timeout(self.stop_timeout, self.child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(addr = %self.addr, %status, "capture proxy stopped");
                    return Ok(());
                }
                Err(_) => warn!(
                    addr = %self.addr,
                    timeout = ?self.stop_timeout,
                    "capture proxy ignored SIGTERM, killing it"
                ),
            }
        }

        self.child.kill().await?;
        info!(addr = %self.addr, "capture proxy killed");
        Ok(())
    }

    async fn terminate(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };

        let sent = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match sent {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(pid, %status, "could not signal capture proxy");
                false
            }
            Err(e) => {
                warn!(pid, error = %e, "could not run kill");
                false
            }
        }
    }
}

impl Drop for CaptureProxy {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!(addr = %self.addr, "killing capture proxy on drop");
            let _ = self.child.start_kill();
        }
    }
}
