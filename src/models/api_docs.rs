use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
    #[serde(default)]
    pub user_bound: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_all: bool,
    #[serde(default)]
    pub parameters: Vec<ApiParameter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiParameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub required: bool,
}

/// One request URL (or path template) derived from an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLink {
    pub link: String,
    pub required_params: Vec<ApiParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRule {
    pub name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaOverride {
    pub target: String,
    pub set: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<TagRule>,
    #[serde(default)]
    pub without_auth: Vec<String>,
    #[serde(default)]
    pub schema_names: BTreeMap<String, String>,
    #[serde(default)]
    pub schema_overrides: Vec<SchemaOverride>,
    #[serde(default)]
    pub endpoints: Vec<ApiEndpoint>,
}
