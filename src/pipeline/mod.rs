//! End-to-end orchestration: capture, synthesize, post-process.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use crate::capture::{shutdown_signal, CaptureProxy};
use crate::catalog::Catalog;
use crate::config::{Credentials, ProxySettings, Settings};
use crate::error::{PipelineError, Result};
use crate::openapi::{self, FixupReport};
use crate::synth::SpecSynthesizer;
use crate::walker::{ApiClient, ApiCollector, CollectReport};

#[derive(Debug, Default)]
pub struct RunSummary {
    pub collected: Option<CollectReport>,
    pub templated_paths: usize,
    pub drifted_paths: usize,
    pub fixups: FixupReport,
}

pub struct Pipeline {
    settings: Settings,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Runs every stage in order, stopping on SIGTERM or SIGINT. The first
    /// failure aborts the run.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs every stage in order until `interrupt` resolves. An interrupt
    /// at any stage stops the child process of that stage and yields
    /// [`PipelineError::Interrupted`].
    pub async fn run_until<F>(&self, interrupt: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let settings = &self.settings;
        let credentials = settings.credentials()?;
        let catalog = Catalog::load(&settings.catalog_path)?;
        tokio::pin!(interrupt);

        let mut summary = RunSummary::default();
        if settings.skip_capture {
            if !settings.capture_log.is_file() {
                return Err(PipelineError::Config(format!(
                    "SKIP_CAPTURE is set but capture log {} does not exist",
                    settings.capture_log.display()
                )));
            }
            info!(
                log = %settings.capture_log.display(),
                "skipping capture, reusing existing log"
            );
        } else {
            let proxy = settings.proxy()?;
            let report = self
                .capture(&proxy, &catalog, &credentials, interrupt.as_mut())
                .await?;
            summary.collected = Some(report);
        }

        tokio::select! {
            biased;
            _ = &mut interrupt => return Err(PipelineError::Interrupted),
            processed = self.process(&catalog, &mut summary) => processed?,
        }

        info!(output = %settings.openapi_path.display(), "pipeline finished");
        Ok(summary)
    }

    /// Walks the API through the interception proxy. The proxy is stopped
    /// before this returns, whether the walk succeeded, failed or was
    /// interrupted.
    async fn capture<F>(
        &self,
        proxy_settings: &ProxySettings,
        catalog: &Catalog,
        credentials: &Credentials,
        mut interrupt: Pin<&mut F>,
    ) -> Result<CollectReport>
    where
        F: Future<Output = ()>,
    {
        let settings = &self.settings;
        let started = CaptureProxy::start(
            &proxy_settings.command,
            proxy_settings.addr,
            &settings.capture_log,
            proxy_settings.ready_timeout,
        );
        // Dropping a proxy that is still starting kills it.
        let proxy = tokio::select! {
            biased;
            _ = &mut interrupt => return Err(PipelineError::Interrupted),
            started = started => started?,
        };

        let proxy_url = proxy.proxy_url();
        let walk = async {
            let client = ApiClient::new(&settings.base_uri, credentials, Some(&proxy_url))?;
            let has_user_token = credentials.user_token.is_some();
            ApiCollector::new(client, catalog, None, has_user_token).run().await
        };
        let walked = tokio::select! {
            biased;
            _ = &mut interrupt => Err(PipelineError::Interrupted),
            report = walk => report,
        };

        let stopped = proxy.shutdown().await;
        let report = walked?;
        stopped?;
        Ok(report)
    }

    /// Converter passes and document transforms over the capture log.
    async fn process(&self, catalog: &Catalog, summary: &mut RunSummary) -> Result<()> {
        let settings = &self.settings;
        let synth = SpecSynthesizer::new(
            &settings.converter_command,
            &settings.capture_log,
            &settings.openapi_path,
            &settings.base_uri,
        );
        synth.synthesize(false).await?;

        let mapping = openapi::run_apply_path_templates(&settings.openapi_path, catalog)?;
        summary.templated_paths = mapping.len();

        synth.synthesize(true).await?;
        summary.drifted_paths = openapi::check_template_drift(&settings.openapi_path)?;

        summary.fixups = openapi::run_fixup(&settings.openapi_path, catalog)?;
        openapi::run_merge(&settings.openapi_path, &settings.base_spec_path)?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::sleep;

    use crate::openapi::OpenApiDocument;

    const CATALOG: &str = "endpoints:\n  - {id: commodities, method: GET, path: /commodities}\n";

    const BASE: &str = r#"
openapi: 3.0.3
info: {title: UEX API, version: "2.0"}
servers:
  - url: https://api.uexcorp.space/2.0
components:
  securitySchemes:
    application: {type: http, scheme: bearer}
"#;

    // First pass writes the draft, the examples pass leaves it alone.
    const CONVERTER: &str = r#"#!/bin/sh
if [ "$9" = "--examples" ]; then exit 0; fi
cat > "$4" <<'YAML'
openapi: 3.0.0
info: {title: draft, version: 1.0.0}
paths:
  /commodities/1:
    get:
      responses:
        '200': {description: OK}
  /commodities/2:
    get:
      responses:
        '200': {description: OK}
YAML
"#;

    fn executable(path: &Path, body: &str) -> String {
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn settings(dir: &Path, overrides: &[(&str, &str)]) -> Settings {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("APP_TOKEN".to_string(), "app".to_string()),
            ("PROXY_COMMAND".to_string(), "/nonexistent/mitmdump".to_string()),
            ("CAPTURE_LOG".to_string(), dir.join("flows").display().to_string()),
            ("OPENAPI_FILE".to_string(), dir.join("openapi.yaml").display().to_string()),
            ("BASE_SPEC_FILE".to_string(), dir.join("openapi.base.yaml").display().to_string()),
            ("CATALOG_FILE".to_string(), dir.join("endpoints.yaml").display().to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }
        Settings::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    /// A proxy stand-in that records its pid and exits cleanly on SIGTERM.
    fn fake_proxy(dir: &Path) -> String {
        executable(
            &dir.join("proxy.sh"),
            &format!(
                "#!/bin/sh\necho $$ > {}\ntrap 'exit 0' TERM INT\nwhile true; do sleep 0.1; done\n",
                dir.join("proxy.pid").display()
            ),
        )
    }

    fn process_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
            && !std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .map(|stat| stat.contains(") Z "))
                .unwrap_or(true)
    }

    async fn assert_stopped(pid_file: &Path) {
        let pid: u32 = std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap();
        for _ in 0..20 {
            if !process_alive(pid) {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("process {pid} outlived the pipeline");
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..50 {
            if std::fs::read_to_string(path).is_ok_and(|s| !s.trim().is_empty()) {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn missing_app_token_fails_before_capture() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), &[("APP_TOKEN", "")]);

        let err = Pipeline::new(settings).run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(!dir.path().join("flows").exists());
    }

    #[tokio::test]
    async fn skip_capture_requires_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        let settings = settings(dir.path(), &[("SKIP_CAPTURE", "1")]);

        let err = Pipeline::new(settings).run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn skip_capture_leaves_log_untouched_and_starts_no_proxy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        std::fs::write(dir.path().join("flows"), b"recorded flows").unwrap();
        let settings = settings(
            dir.path(),
            &[("SKIP_CAPTURE", "true"), ("CONVERTER_COMMAND", "false")],
        );

        let err = Pipeline::new(settings).run().await.unwrap_err();

        // The converter ran (and failed); the proxy binary does not exist.
        assert!(matches!(err, PipelineError::ToolFailed { ref tool, .. } if tool == "false"));
        assert_eq!(std::fs::read(dir.path().join("flows")).unwrap(), b"recorded flows");
    }

    #[tokio::test]
    async fn run_produces_templated_document_with_base_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        std::fs::write(dir.path().join("openapi.base.yaml"), BASE).unwrap();
        std::fs::write(dir.path().join("flows"), b"recorded flows").unwrap();
        let converter = executable(&dir.path().join("converter.sh"), CONVERTER);
        let settings = settings(
            dir.path(),
            &[("SKIP_CAPTURE", "yes"), ("CONVERTER_COMMAND", converter.as_str())],
        );

        let summary = Pipeline::new(settings).run().await.unwrap();

        assert!(summary.collected.is_none());
        assert_eq!(summary.templated_paths, 2);
        assert_eq!(summary.drifted_paths, 0);

        let doc = OpenApiDocument::load(&dir.path().join("openapi.yaml")).unwrap();
        let paths = doc.paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths.contains_key("/commodities/{id}"));
        assert_eq!(
            doc.get("info.title").and_then(|v| v.as_str()),
            Some("UEX API")
        );
        assert_eq!(std::fs::read(dir.path().join("flows")).unwrap(), b"recorded flows");
    }

    #[tokio::test]
    async fn capture_failure_still_stops_the_proxy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        let proxy = fake_proxy(dir.path());

        // Accepts and hangs up, so every proxied request is a transport error.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let settings = settings(
            dir.path(),
            &[
                ("PROXY_COMMAND", proxy.as_str()),
                ("PROXY_ADDR", addr.as_str()),
                ("BASE_URI", "http://api.uex.test/2.0"),
            ],
        );

        let err = Pipeline::new(settings)
            .run_until(std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Http(_)), "{err:?}");
        assert_stopped(&dir.path().join("proxy.pid")).await;
    }

    #[tokio::test]
    async fn malformed_proxy_address_fails_a_capturing_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        let settings = settings(dir.path(), &[("PROXY_ADDR", "localhost")]);

        let err = Pipeline::new(settings).run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(!dir.path().join("flows").exists());
    }

    #[tokio::test]
    async fn interrupt_while_proxy_starts_stops_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        let proxy = fake_proxy(dir.path());

        // Nothing listens here, so the proxy never becomes ready.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let settings = settings(
            dir.path(),
            &[
                ("PROXY_COMMAND", proxy.as_str()),
                ("PROXY_ADDR", addr.as_str()),
                ("PROXY_READY_TIMEOUT", "30"),
            ],
        );
        let pid_file = dir.path().join("proxy.pid");
        let interrupt = {
            let pid_file = pid_file.clone();
            async move { wait_for_file(&pid_file).await }
        };

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            Pipeline::new(settings).run_until(interrupt),
        )
        .await
        .expect("interrupt did not stop the run")
        .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert_stopped(&pid_file).await;
    }

    #[tokio::test]
    async fn interrupt_during_conversion_stops_the_converter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("endpoints.yaml"), CATALOG).unwrap();
        std::fs::write(dir.path().join("flows"), b"recorded flows").unwrap();
        let pid_file = dir.path().join("converter.pid");
        let converter = executable(
            &dir.path().join("converter.sh"),
            &format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        );
        let settings = settings(
            dir.path(),
            &[("SKIP_CAPTURE", "1"), ("CONVERTER_COMMAND", converter.as_str())],
        );
        let interrupt = {
            let pid_file = pid_file.clone();
            async move { wait_for_file(&pid_file).await }
        };

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            Pipeline::new(settings).run_until(interrupt),
        )
        .await
        .expect("interrupt did not stop the run")
        .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert_stopped(&pid_file).await;
        assert!(!dir.path().join("openapi.yaml").exists());
    }
}
