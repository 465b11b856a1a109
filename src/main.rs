mod capture;
mod catalog;
mod config;
mod error;
mod models;
mod openapi;
mod pipeline;
mod scraper;
mod synth;
mod walker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::models::ApiCatalog;
use crate::walker::{ApiClient, ApiCollector, ResponseCache};

#[derive(Parser)]
#[command(name = "uex-openapi")]
#[command(about = "Reverse-engineers an OpenAPI document for the UEX API from captured traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture traffic, synthesize and post-process the document
    Run,
    /// Walk every catalog endpoint without starting the proxy
    Collect {
        /// Always hit the network instead of the response cache
        #[arg(long)]
        no_api_cache: bool,
        /// Send requests through this proxy (otherwise HTTP(S)_PROXY applies)
        #[arg(long)]
        proxy: Option<String>,
        /// Write a JSON report of the walk to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Collapse concrete paths into path templates
    ApplyPathTemplates,
    /// Add operation metadata and extract named schemas
    Fixup,
    /// Overlay static sections from the base document
    Merge,
    /// Scrape the documentation site into the endpoint catalog
    Discover {
        /// Always fetch documentation pages instead of the response cache
        #[arg(long)]
        no_api_cache: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Run => {
            println!("Generating OpenAPI document for {}...", settings.base_uri);
            let summary = pipeline::Pipeline::new(settings.clone()).run().await?;
            if let Some(report) = &summary.collected {
                println!(
                    "Collected {} responses ({} failed, {} skipped)",
                    report.requested, report.failed, report.skipped
                );
            }
            println!("Templated {} paths", summary.templated_paths);
            if summary.drifted_paths > 0 {
                println!(
                    "Warning: {} paths are not covered by path templates",
                    summary.drifted_paths
                );
            }
            println!(
                "Updated {} operations, extracted {} schemas",
                summary.fixups.operations_updated,
                summary.fixups.response_schemas + summary.fixups.named_schemas
            );
            println!("OpenAPI document saved to: {}", settings.openapi_path.display());
        }
        Commands::Collect {
            no_api_cache,
            proxy,
            report,
        } => {
            let credentials = settings.credentials()?;
            let catalog = Catalog::load(&settings.catalog_path)?;
            let cache = (!no_api_cache).then(|| ResponseCache::new(&settings.cache_dir));
            let client = ApiClient::new(&settings.base_uri, &credentials, proxy.as_deref())?;

            println!(
                "Collecting {} endpoints from {}...",
                catalog.endpoints().len(),
                settings.base_uri
            );
            let has_user_token = credentials.user_token.is_some();
            let result = ApiCollector::new(client, &catalog, cache, has_user_token)
                .run()
                .await?;
            println!(
                "Requested {}, cached {}, failed {}, skipped {}",
                result.requested, result.cached, result.failed, result.skipped
            );

            if let Some(report_path) = report {
                if let Some(parent) = report_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&report_path, serde_json::to_string_pretty(&result)?)?;
                println!("Report saved to: {}", report_path.display());
            }
        }
        Commands::ApplyPathTemplates => {
            let catalog = Catalog::load(&settings.catalog_path)?;
            let mapping = openapi::run_apply_path_templates(&settings.openapi_path, &catalog)?;
            println!("Templated {} paths in {}", mapping.len(), settings.openapi_path.display());
        }
        Commands::Fixup => {
            let catalog = Catalog::load(&settings.catalog_path)?;
            let report = openapi::run_fixup(&settings.openapi_path, &catalog)?;
            println!("Fixed up {}: {:?}", settings.openapi_path.display(), report);
        }
        Commands::Merge => {
            openapi::run_merge(&settings.openapi_path, &settings.base_spec_path)?;
            println!(
                "Merged {} into {}",
                settings.base_spec_path.display(),
                settings.openapi_path.display()
            );
        }
        Commands::Discover {
            no_api_cache,
            output,
        } => {
            println!("Scraping UEX API documentation...");
            let cache = (!no_api_cache).then(|| ResponseCache::new(&settings.cache_dir));
            let auth = settings.docs_auth.clone();
            let docs = scraper::UexDocsScraper::new(&settings.docs_uri, auth, cache)?;
            let endpoints = docs.scrape().await?;
            println!("Found {} endpoints", endpoints.len());

            let mut catalog = if settings.catalog_path.exists() {
                Catalog::load(&settings.catalog_path)?
            } else {
                Catalog::new(ApiCatalog::default())?
            };
            catalog.replace_endpoints(endpoints);

            let output_path = output.unwrap_or_else(|| settings.catalog_path.clone());
            catalog.save(&output_path)?;
            println!("Endpoint catalog saved to: {}", output_path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_accepts_no_api_cache() {
        let args = ["uex-openapi", "discover", "--no-api-cache", "-o", "out.yaml"];
        let cli = Cli::try_parse_from(args).unwrap();

        match cli.command {
            Commands::Discover {
                no_api_cache,
                output,
            } => {
                assert!(no_api_cache);
                assert_eq!(output, Some(PathBuf::from("out.yaml")));
            }
            _ => panic!("expected discover"),
        }
    }

    #[test]
    fn discover_uses_cache_by_default() {
        let cli = Cli::try_parse_from(["uex-openapi", "discover"]).unwrap();

        assert!(matches!(
            cli.command,
            Commands::Discover {
                no_api_cache: false,
                ..
            }
        ));
    }
}
