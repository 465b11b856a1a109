use serde_yaml::Value;

use crate::models::{ApiEndpoint, ApiParameter, EndpointLink};

use super::Catalog;

/// Expands an endpoint into request links.
///
/// Required parameters are path segments (`name/value/`), optional ones go
/// into the query string. With `templated` set, values become `{name}`
/// placeholders and no query string is produced.
pub fn endpoint_links(
    catalog: &Catalog,
    endpoint: &ApiEndpoint,
    templated: bool,
) -> Vec<EndpointLink> {
    let required: Vec<&ApiParameter> = endpoint.parameters.iter().filter(|p| p.required).collect();
    let optional: Vec<&ApiParameter> = endpoint.parameters.iter().filter(|p| !p.required).collect();

    let required_sets: Vec<Vec<&ApiParameter>> = if required.is_empty() {
        vec![vec![]]
    } else if endpoint.require_all {
        vec![required.clone()]
    } else {
        required.iter().map(|p| vec![*p]).collect()
    };

    let mut links: Vec<EndpointLink> = Vec::new();
    for set in &required_sets {
        let mut variants: Vec<Vec<&ApiParameter>> = vec![vec![]];
        if !templated {
            variants.extend(optional.iter().map(|p| vec![*p]));
            variants.extend(
                required
                    .iter()
                    .filter(|p| !set.iter().any(|s| s.name == p.name))
                    .map(|p| vec![*p]),
            );
        }

        for query_params in variants {
            let link = build_link(catalog, endpoint, set, &query_params, templated);
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    links
}

fn build_link(
    catalog: &Catalog,
    endpoint: &ApiEndpoint,
    path_params: &[&ApiParameter],
    query_params: &[&ApiParameter],
    templated: bool,
) -> EndpointLink {
    let mut link = format!("{}/", endpoint.path.trim_end_matches('/'));
    for param in path_params {
        let value = if templated {
            format!("{{{}}}", param.name)
        } else {
            catalog.sample_value(endpoint, &param.name).unwrap_or_default()
        };
        link.push_str(&format!("{}/{}/", param.name, value));
    }

    if !templated && !query_params.is_empty() {
        let query: Vec<String> = query_params
            .iter()
            .map(|p| {
                let value = catalog.sample_value(endpoint, &p.name).unwrap_or_default();
                format!("{}={}", p.name, value)
            })
            .collect();
        link.push('?');
        link.push_str(&query.join("&"));
    }

    EndpointLink {
        link,
        required_params: path_params.iter().map(|p| (*p).clone()).collect(),
    }
}

pub(super) fn value_to_param(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
