use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::api_client::ApiClient;
use super::cache::ResponseCache;
use crate::catalog::Catalog;
use crate::error::{PipelineError, Result};
use crate::models::ApiEndpoint;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    pub requested: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
    pub collected_at: Option<DateTime<Utc>>,
}

/// Walks every catalog endpoint so the capture proxy sees a representative
/// request/response pair for each of them.
pub struct ApiCollector<'a> {
    client: ApiClient,
    catalog: &'a Catalog,
    cache: Option<ResponseCache>,
    has_user_token: bool,
}

impl<'a> ApiCollector<'a> {
    pub fn new(
        client: ApiClient,
        catalog: &'a Catalog,
        cache: Option<ResponseCache>,
        has_user_token: bool,
    ) -> Self {
        Self {
            client,
            catalog,
            cache,
            has_user_token,
        }
    }

    pub async fn run(&self) -> Result<CollectReport> {
        let mut report = CollectReport::default();

        for endpoint in self.catalog.endpoints() {
            if endpoint.user_bound && !self.has_user_token {
                debug!(endpoint = %endpoint.id, "skipping user-bound endpoint without user token");
                report.skipped += 1;
                continue;
            }
            self.collect_endpoint(endpoint, &mut report).await?;
        }

        report.collected_at = Some(Utc::now());
        info!(
            requested = report.requested,
            cached = report.cached,
            failed = report.failed,
            skipped = report.skipped,
            "collection finished"
        );
        Ok(report)
    }

    async fn collect_endpoint(
        &self,
        endpoint: &ApiEndpoint,
        report: &mut CollectReport,
    ) -> Result<()> {
        let method = endpoint.method.to_uppercase();
        if method != "GET" && method != "POST" {
            debug!(endpoint = %endpoint.id, %method, "skipping unsupported method");
            report.skipped += 1;
            return Ok(());
        }

        let failed_before = report.failed;
        for link in self.catalog.links(endpoint) {
            if let Some(cache) = &self.cache {
                if cache.get(&link.link).is_some() {
                    report.cached += 1;
                    continue;
                }
            }

            let result = if method == "POST" {
                self.client.post(&link.link, endpoint.body.as_ref()).await
            } else {
                self.client.request(Method::GET, &link.link).await
            };
            report.requested += 1;

            match result {
                Ok(body) => {
                    if let Some(cache) = &self.cache {
                        cache.put(&link.link, &body)?;
                    }
                }
                Err(PipelineError::HttpStatus { url, status, body }) => {
                    error!(%url, %status, "request failed");
                    debug!(%body, "response");
                    report.failed += 1;
                    report.failures.push(format!("{} {}", status.as_u16(), url));
                }
                Err(e) => return Err(e),
            }
        }

        if report.failed > failed_before {
            warn!(
                endpoint = %endpoint.id,
                failed = report.failed - failed_before,
                "endpoint had failed requests"
            );
        }
        Ok(())
    }
}
