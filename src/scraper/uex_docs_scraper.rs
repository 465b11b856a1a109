use crate::models::{ApiEndpoint, ApiParameter};
use crate::walker::ResponseCache;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, warn};

pub struct UexDocsScraper {
    docs_url: Url,
    auth: Option<(String, String)>,
    cache: Option<ResponseCache>,
    client: reqwest::Client,
}

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

fn is_http_status_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.status().is_some())
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

impl UexDocsScraper {
    pub fn new(
        docs_uri: &str,
        auth: Option<(String, String)>,
        cache: Option<ResponseCache>,
    ) -> Result<Self> {
        let docs_url =
            Url::parse(docs_uri).with_context(|| format!("invalid docs URI {}", docs_uri))?;
        Ok(Self {
            docs_url,
            auth,
            cache,
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
                .timeout(std::time::Duration::from_secs(30))
                .danger_accept_invalid_certs(true)
                .build()?,
        })
    }

    /// Fetches the documentation index and parses every endpoint page it
    /// links to. Pages that answer with an HTTP error are skipped.
    pub async fn scrape(&self) -> Result<Vec<ApiEndpoint>> {
        info!(url = %self.docs_url, "scraping documentation index");
        let index = self.fetch(&self.docs_url).await?;
        let links = endpoint_links(&index)?;
        info!("discovered {} endpoints", links.len());
        if links.is_empty() {
            error!("no endpoint links found");
        }

        let mut endpoints = Vec::new();
        for href in links {
            let url = self
                .docs_url
                .join(&href)
                .with_context(|| format!("invalid endpoint link {}", href))?;
            let html = match self.fetch(&url).await {
                Ok(html) => html,
                Err(e) if is_http_status_error(&e) => {
                    error!(%url, error = %e, "failed to process endpoint docs");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let endpoint = parse_endpoint_page(url.as_str(), &html)?;
            info!(
                "discovered endpoint: {} {} ({})",
                endpoint.method, endpoint.id, endpoint.description
            );
            endpoints.push(endpoint);
        }

        Ok(endpoints)
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let key = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        if let Some(cache) = &self.cache {
            if let Some(html) = cache.get(&key) {
                return Ok(html);
            }
        }

        debug!(%url, "fetching");
        let mut request = self.client.get(url.clone());
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let html = request.send().await?.error_for_status()?.text().await?;

        if let Some(cache) = &self.cache {
            cache.put(&key, &html)?;
        }
        Ok(html)
    }
}

/// Links to the per-endpoint pages listed on the documentation index.
pub fn endpoint_links(index_html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(index_html);
    let links = selector("p.mgb-5.pdl-10 a")?;

    let mut hrefs: Vec<String> = Vec::new();
    for link in document.select(&links) {
        if let Some(href) = link.value().attr("href") {
            if !hrefs.iter().any(|h| h == href) {
                hrefs.push(href.to_string());
            }
        }
    }
    Ok(hrefs)
}

/// Extracts an endpoint definition from one documentation page.
pub fn parse_endpoint_page(url: &str, html: &str) -> Result<ApiEndpoint> {
    let document = Html::parse_document(html);

    let id = Regex::new(r".*/id/([^/]*)")?
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow!("no endpoint id in {}", url))?;

    let method = table_cell(&document, "Method")?
        .map(text_of)
        .ok_or_else(|| anyhow!("{}: no Method row", url))?;

    let heading = document
        .select(&selector("h2.text-monospace")?)
        .next()
        .ok_or_else(|| anyhow!("{}: no path heading", url))?;
    let path = heading
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("{}: empty path heading", url))?
        .trim_end_matches('/')
        .to_string();

    let description = document
        .select(&selector("h4.mgb-20")?)
        .next()
        .map(text_of)
        .unwrap_or_default();

    let mut user_bound = false;
    let mut parameters = Vec::new();
    if let Some(inputs) = table_cell(&document, "Input")? {
        let type_info = Regex::new(r"(?P<name>[^(]+)(\((?P<length>\d+)\))?")?;
        for tag in inputs.select(&selector("strong")?) {
            let name = text_of(tag);
            if name == "secret_key" {
                user_bound = true;
                continue;
            }

            let em = tag
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "em")
                .map(text_of)
                .unwrap_or_default();
            let (param_type, length) = match type_info.captures(&em) {
                Some(caps) => (
                    caps.name("name").map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                    caps.name("length").and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
                ),
                None => {
                    warn!(%url, parameter = %name, "no type information");
                    (String::new(), 0)
                }
            };

            parameters.push(ApiParameter {
                name,
                param_type,
                length,
                required: tag.value().classes().any(|c| c == "text-red"),
            });
        }
    }

    Ok(ApiEndpoint {
        id,
        method,
        path,
        description,
        docs_url: Some(url.to_string()),
        user_bound,
        require_all: false,
        parameters,
        defaults: Default::default(),
        body: None,
    })
}

/// The `td` next to the `#table-documentation` header cell labelled `label`.
fn table_cell<'a>(document: &'a Html, label: &str) -> Result<Option<ElementRef<'a>>> {
    let rows = selector("#table-documentation tr")?;
    let header = selector("th")?;
    let cell = selector("td")?;

    for row in document.select(&rows) {
        let matches = row.select(&header).next().is_some_and(|th| text_of(th) == label);
        if matches {
            return Ok(row.select(&cell).next());
        }
    }
    Ok(None)
}
