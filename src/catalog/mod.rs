//! The declarative endpoint catalog.
//!
//! The catalog is the list of endpoints the walker visits together with the
//! rules the post-processing passes need: sample parameter values, tag rules,
//! unauthenticated paths, schema names and schema overrides.

mod links;

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{ApiCatalog, ApiEndpoint, EndpointLink, SchemaOverride};

use links::endpoint_links;

enum PathMatcher {
    Exact(String),
    Pattern(Regex),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Exact(expected) => expected == path,
            PathMatcher::Pattern(re) => re.is_match(path),
        }
    }
}

pub struct Catalog {
    data: ApiCatalog,
    tag_matchers: Vec<(String, Vec<PathMatcher>)>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            PipelineError::Yaml(inner) => PipelineError::transform(path, inner.to_string()),
            other => other,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let data: ApiCatalog = serde_yaml::from_str(yaml)?;
        Self::new(data)
    }

    pub fn new(data: ApiCatalog) -> Result<Self> {
        let mut tag_matchers = Vec::with_capacity(data.tags.len());
        for rule in &data.tags {
            let mut matchers = Vec::with_capacity(rule.paths.len());
            for path in &rule.paths {
                if path.starts_with('^') {
                    let re = Regex::new(path).map_err(|e| {
                        PipelineError::Config(format!(
                            "invalid tag pattern {} for {}: {}",
                            path, rule.name, e
                        ))
                    })?;
                    matchers.push(PathMatcher::Pattern(re));
                } else {
                    matchers.push(PathMatcher::Exact(path.clone()));
                }
            }
            tag_matchers.push((rule.name.clone(), matchers));
        }

        Ok(Self { data, tag_matchers })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_yaml::to_string(&self.data)?)?;
        Ok(())
    }

    pub fn endpoints(&self) -> &[ApiEndpoint] {
        &self.data.endpoints
    }

    pub fn schema_names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.schema_names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn schema_overrides(&self) -> &[SchemaOverride] {
        &self.data.schema_overrides
    }

    /// Swaps in freshly scraped endpoints. Hand-maintained sample data
    /// (`defaults`, `body`, `require_all`) carries over by endpoint id.
    pub fn replace_endpoints(&mut self, mut endpoints: Vec<ApiEndpoint>) {
        for endpoint in &mut endpoints {
            if let Some(previous) = self.data.endpoints.iter().find(|e| e.id == endpoint.id) {
                if endpoint.defaults.is_empty() {
                    endpoint.defaults = previous.defaults.clone();
                }
                if endpoint.body.is_none() {
                    endpoint.body = previous.body.clone();
                }
                endpoint.require_all |= previous.require_all;
            }
        }
        self.data.endpoints = endpoints;
        self.data.scraped_at = Some(chrono::Utc::now());
    }

    pub fn links(&self, endpoint: &ApiEndpoint) -> Vec<EndpointLink> {
        endpoint_links(self, endpoint, false)
    }

    pub fn templated_links(&self, endpoint: &ApiEndpoint) -> Vec<EndpointLink> {
        endpoint_links(self, endpoint, true)
    }

    /// Every templated link of every endpoint, in catalog order.
    pub fn path_templates(&self) -> Vec<String> {
        let mut templates: Vec<String> = Vec::new();
        for endpoint in self.endpoints() {
            for link in self.templated_links(endpoint) {
                if !templates.contains(&link.link) {
                    templates.push(link.link);
                }
            }
        }
        templates
    }

    /// Sample value for a parameter, endpoint overrides first.
    pub fn sample_value(&self, endpoint: &ApiEndpoint, name: &str) -> Option<String> {
        endpoint
            .defaults
            .get(name)
            .or_else(|| self.data.defaults.get(name))
            .and_then(links::value_to_param)
    }

    pub fn tags_for(&self, endpoint: &ApiEndpoint) -> Vec<String> {
        let mut tags = Vec::new();
        if endpoint.user_bound {
            tags.push("User".to_string());
        }

        for (tag, matchers) in &self.tag_matchers {
            if matchers.iter().any(|m| m.matches(&endpoint.path)) {
                tags.push(tag.clone());
            }
        }

        debug!(endpoint = %endpoint.id, ?tags, "resolved tags");
        tags
    }

    /// Security requirement names: `user` for user-bound endpoints and
    /// `application` unless the path is served without authentication.
    pub fn security_for(&self, endpoint: &ApiEndpoint) -> Vec<&'static str> {
        let mut securities = Vec::new();
        if endpoint.user_bound {
            securities.push("user");
        }
        if !self.data.without_auth.iter().any(|p| p == &endpoint.path) {
            securities.push("application");
        }
        securities
    }
}
