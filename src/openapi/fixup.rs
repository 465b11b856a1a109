//! Targeted corrections for systematic converter mistakes.
//!
//! The converter names nothing, inlines every response schema and guesses
//! types from a handful of samples. These rules patch that up using the
//! endpoint catalog; they do not attempt any general inference.

use serde_yaml::{Mapping, Sequence, Value};
use tracing::{debug, error, info, warn};

use super::document::{entry_mut, lookup_mut, merge_overwrite, split_keys, OpenApiDocument};
use crate::catalog::Catalog;
use crate::error::{PipelineError, Result};
use crate::models::ApiEndpoint;

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FixupReport {
    pub operations_updated: usize,
    pub response_schemas: usize,
    pub named_schemas: usize,
    pub enums_normalized: usize,
    pub overrides: usize,
}

pub fn apply_fixups(doc: &mut OpenApiDocument, catalog: &Catalog) -> Result<FixupReport> {
    let report = FixupReport {
        operations_updated: apply_operation_metadata(doc, catalog)?,
        response_schemas: extract_response_schemas(doc, catalog)?,
        named_schemas: extract_named_schemas(doc, catalog)?,
        enums_normalized: normalize_enums(doc.root_mut()),
        overrides: apply_schema_overrides(doc, catalog)?,
    };

    info!(?report, "applied fixups");
    Ok(report)
}

fn response_status_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "200" => "Ok",
        "201" => "Created",
        "400" => "Bad_Request",
        "401" => "Unauthorized",
        "403" => "Forbidden",
        "404" => "Not_Found",
        "405" => "Method_Not_Allowed",
        "429" => "Too_Many_Requests",
        "500" => "Internal_Server_Error",
        "503" => "Service_Unavailable",
        _ => return None,
    };
    Some(name)
}

pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

pub fn pascal_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn operation_id(endpoint: &ApiEndpoint, required: &[String]) -> String {
    let mut id = format!("{}_{}", endpoint.method.to_lowercase(), endpoint.id);
    if !required.is_empty() {
        let names: Vec<&str> = required
            .iter()
            .map(|name| name.strip_prefix("id_").unwrap_or(name))
            .collect();
        id.push_str("_by_");
        id.push_str(&names.join("_and_"));
    }
    snake_case(&id)
}

fn sequence_of<I: IntoIterator<Item = String>>(items: I) -> Value {
    Value::Sequence(items.into_iter().map(Value::from).collect())
}

fn operation_metadata(catalog: &Catalog, endpoint: &ApiEndpoint, required: &[String]) -> Mapping {
    let security: Sequence = catalog
        .security_for(endpoint)
        .into_iter()
        .map(|name| {
            let mut requirement = Mapping::new();
            requirement.insert(Value::from(name), Value::Sequence(Sequence::new()));
            Value::Mapping(requirement)
        })
        .collect();

    let mut data = Mapping::new();
    data.insert(Value::from("operationId"), Value::from(operation_id(endpoint, required)));
    data.insert(Value::from("summary"), Value::from(endpoint.description.as_str()));
    data.insert(Value::from("tags"), sequence_of(catalog.tags_for(endpoint)));
    data.insert(Value::from("security"), Value::Sequence(security));
    data
}

/// Sets operationId, summary, tags and security on every operation the
/// catalog knows about.
fn apply_operation_metadata(doc: &mut OpenApiDocument, catalog: &Catalog) -> Result<usize> {
    let mut data_by_path: Vec<(String, String, Mapping)> = Vec::new();
    for endpoint in catalog.endpoints() {
        for link in catalog.templated_links(endpoint) {
            let required: Vec<String> =
                link.required_params.iter().map(|p| p.name.clone()).collect();
            data_by_path.push((
                link.link,
                endpoint.method.to_lowercase(),
                operation_metadata(catalog, endpoint, &required),
            ));
        }
    }

    let mut updated = 0;
    let paths = doc.paths_mut()?;
    for (path, item) in paths.iter_mut() {
        let (Some(path), Some(item)) = (path.as_str(), item.as_mapping_mut()) else {
            continue;
        };
        let entries: Vec<&(String, String, Mapping)> =
            data_by_path.iter().filter(|(p, _, _)| p == path).collect();
        if entries.is_empty() {
            warn!(path, "no catalog mapping for path");
            continue;
        }

        for (method, operation) in item.iter_mut() {
            let Some(method) = method.as_str().filter(|m| HTTP_METHODS.contains(m)) else {
                continue;
            };
            let Some(operation) = operation.as_mapping_mut() else {
                continue;
            };
            match entries.iter().find(|(_, m, _)| m == method) {
                Some((_, _, data)) => {
                    for (key, value) in data {
                        operation.insert(key.clone(), value.clone());
                    }
                    updated += 1;
                }
                None => warn!(path, method, "no catalog data for operation"),
            }
        }
    }

    Ok(updated)
}

/// Adds `schema` under `name`, keeping an existing definition when one is
/// already there.
fn add_schema(schemas: &mut Mapping, name: &str, schema: Value) {
    match schemas.get(name) {
        None => {
            debug!(name, "creating component schema");
            schemas.insert(Value::from(name), schema);
        }
        Some(existing) if existing != &schema => {
            error!(name, "schema already defined with a different definition");
        }
        Some(_) => {}
    }
}

fn schema_ref(name: &str) -> Value {
    let mut reference = Mapping::new();
    reference.insert(Value::from("$ref"), Value::from(format!("#/components/schemas/{}", name)));
    Value::Mapping(reference)
}

fn is_ref(value: &Value) -> bool {
    value.get("$ref").is_some()
}

fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Moves inline response schemas into `components.schemas`, named after the
/// method, endpoint and status, e.g. `GetCommoditiesOkResponse`.
fn extract_response_schemas(doc: &mut OpenApiDocument, catalog: &Catalog) -> Result<usize> {
    let mut extracted: Vec<(String, Value)> = Vec::new();
    let paths = doc.paths_mut()?;

    for endpoint in catalog.endpoints() {
        let endpoint_name = endpoint.path.replace('/', "_").trim_matches('_').to_lowercase();
        for link in catalog.templated_links(endpoint) {
            let Some(Value::Mapping(item)) = paths.get_mut(link.link.as_str()) else {
                continue;
            };

            for (method, operation) in item.iter_mut() {
                let Some(method) = method.as_str() else { continue };
                let Some(Value::Mapping(responses)) = operation.get_mut("responses") else {
                    continue;
                };

                for (code, response) in responses.iter_mut() {
                    let Some(code) = key_string(code) else { continue };
                    let Some(status) = response_status_name(&code) else {
                        warn!(
                            path = %link.link,
                            code = %code,
                            "unknown response status, schema left inline"
                        );
                        continue;
                    };
                    let Some(Value::Mapping(content)) = response.get_mut("content") else {
                        continue;
                    };

                    for (_, media) in content.iter_mut() {
                        let Some(schema) = media.get_mut("schema") else {
                            continue;
                        };
                        if is_ref(schema) {
                            continue;
                        }

                        let name = pascal_case(&format!(
                            "{}_{}_{}_response",
                            method.to_lowercase(),
                            endpoint_name,
                            status.to_lowercase()
                        ));
                        let inline = std::mem::replace(schema, schema_ref(&name));
                        extracted.push((name, inline));
                    }
                }
            }
        }
    }

    let schemas = doc.schemas_mut()?;
    let count = extracted.len();
    for (name, schema) in extracted {
        add_schema(schemas, &name, schema);
    }
    Ok(count)
}

/// Splits nested schemas out of response schemas under the names the
/// catalog assigns to them.
fn extract_named_schemas(doc: &mut OpenApiDocument, catalog: &Catalog) -> Result<usize> {
    let path = doc.path().to_path_buf();
    let schemas = doc.schemas_mut()?;
    let mut count = 0;

    for (selector, name) in catalog.schema_names() {
        let keys = split_keys(selector);
        let Some((root, rest)) = keys.split_first() else {
            let reason = format!("empty schema selector for {}", name);
            return Err(PipelineError::transform(&path, reason));
        };
        let Some(schema) = schemas.get_mut(*root) else {
            warn!(schema = root, "schema not found");
            continue;
        };
        let Some(target) = lookup_mut(schema, rest) else {
            warn!(selector, "selector does not resolve");
            continue;
        };
        if is_ref(target) {
            continue;
        }

        debug!(selector, name, "extracting named schema");
        let inline = std::mem::replace(target, schema_ref(name));
        add_schema(schemas, name, inline);
        count += 1;
    }

    Ok(count)
}

/// Drops null and duplicate enum members, and enums that end up empty.
fn normalize_enums(value: &mut Value) -> usize {
    match value {
        Value::Mapping(mapping) => {
            let mut changed = 0;
            let mut remove_enum = false;
            if let Some(Value::Sequence(members)) = mapping.get_mut("enum") {
                let mut cleaned: Sequence = Vec::with_capacity(members.len());
                for member in members.iter() {
                    if !member.is_null() && !cleaned.contains(member) {
                        cleaned.push(member.clone());
                    }
                }
                if cleaned.len() != members.len() {
                    *members = cleaned;
                    changed += 1;
                }
                remove_enum = members.is_empty();
            }
            if remove_enum {
                mapping.remove("enum");
            }

            for (_, child) in mapping.iter_mut() {
                changed += normalize_enums(child);
            }
            changed
        }
        Value::Sequence(items) => items.iter_mut().map(normalize_enums).sum(),
        _ => 0,
    }
}

fn apply_schema_overrides(doc: &mut OpenApiDocument, catalog: &Catalog) -> Result<usize> {
    let path = doc.path().to_path_buf();
    let mut count = 0;

    for schema_override in catalog.schema_overrides() {
        let mut keys = vec!["components", "schemas"];
        keys.extend(split_keys(&schema_override.target));

        let target = entry_mut(doc.root_mut(), &keys)
            .map_err(|reason| PipelineError::transform(&path, reason))?;
        if target.is_null() {
            *target = Value::Mapping(Mapping::new());
        }
        let Some(target) = target.as_mapping_mut() else {
            return Err(PipelineError::transform(
                &path,
                format!("override target {} is not a mapping", schema_override.target),
            ));
        };

        merge_overwrite(target, &schema_override.set);
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::document::lookup;

    const CATALOG: &str = r#"
tags:
  - name: Commodities
    paths: ["^/commodities.*$"]
schema_names:
  GetCommoditiesOkResponse.properties.data.items: CommodityDTO
  MissingOkResponse.properties.data: MissingDTO
schema_overrides:
  - target: CommodityDTO.properties.price_buy
    set:
      type: number
  - target: CommodityDTO
    set:
      required: [id, name]
endpoints:
  - id: commodities
    method: GET
    path: /commodities
    description: Get a list of commodities
  - id: commodities_prices
    method: GET
    path: /commodities_prices
    description: Get commodity prices
    parameters:
      - { name: id_commodity, type: int, required: true }
  - id: user_trades
    method: GET
    path: /user_trades
    description: Get user trades
    user_bound: true
"#;

    const DRAFT: &str = r#"
paths:
  /commodities/:
    get:
      responses:
        '200':
          description: OK
          content:
            application/json:
              schema:
                type: object
                properties:
                  status: {type: string, enum: [ok, ok, null]}
                  data:
                    type: array
                    items:
                      type: object
                      properties:
                        id: {type: number}
                        name: {type: string}
                        price_buy: {type: integer}
        '418':
          description: teapot
          content:
            application/json:
              schema: {type: object}
  /commodities_prices/id_commodity/{id_commodity}/:
    get:
      responses:
        '200':
          description: OK
  /unknown/:
    get: {}
"#;

    fn fixture() -> (OpenApiDocument, Catalog) {
        let doc = OpenApiDocument::from_value("openapi.yaml", serde_yaml::from_str(DRAFT).unwrap());
        (doc, Catalog::from_yaml(CATALOG).unwrap())
    }

    #[test]
    fn case_helpers() {
        assert_eq!(
            snake_case("get_Commodities-Prices__by_commodity"),
            "get_commodities_prices_by_commodity"
        );
        assert_eq!(
            pascal_case("get_commodities_prices_not_found_response"),
            "GetCommoditiesPricesNotFoundResponse"
        );
    }

    #[test]
    fn operation_metadata_comes_from_catalog() {
        let (mut doc, catalog) = fixture();

        apply_fixups(&mut doc, &catalog).unwrap();

        let list = doc.paths().unwrap().get("/commodities/").unwrap();
        assert_eq!(lookup(list, &["get", "operationId"]), Some(&Value::from("get_commodities")));
        assert_eq!(
            lookup(list, &["get", "summary"]),
            Some(&Value::from("Get a list of commodities"))
        );
        assert_eq!(
            lookup(list, &["get", "tags"]),
            Some(&Value::Sequence(vec![Value::from("Commodities")]))
        );
        let security = lookup(list, &["get", "security"]).unwrap().as_sequence().unwrap();
        assert_eq!(security.len(), 1);
        assert!(security[0].get("application").is_some());

        let prices = doc
            .paths()
            .unwrap()
            .get("/commodities_prices/id_commodity/{id_commodity}/")
            .unwrap();
        assert_eq!(
            lookup(prices, &["get", "operationId"]),
            Some(&Value::from("get_commodities_prices_by_commodity"))
        );

        let unknown = doc.paths().unwrap().get("/unknown/").unwrap();
        assert!(lookup(unknown, &["get", "operationId"]).is_none());
    }

    #[test]
    fn response_schemas_move_to_components() {
        let (mut doc, catalog) = fixture();

        let report = apply_fixups(&mut doc, &catalog).unwrap();
        assert_eq!(report.response_schemas, 1);

        let schema = lookup(
            doc.root(),
            &[
                "paths",
                "/commodities/",
                "get",
                "responses",
                "200",
                "content",
                "application/json",
                "schema",
            ],
        )
        .unwrap();
        assert_eq!(
            schema.get("$ref"),
            Some(&Value::from("#/components/schemas/GetCommoditiesOkResponse"))
        );

        let teapot = lookup(
            doc.root(),
            &[
                "paths",
                "/commodities/",
                "get",
                "responses",
                "418",
                "content",
                "application/json",
                "schema",
            ],
        )
        .unwrap();
        assert!(teapot.get("$ref").is_none());
    }

    #[test]
    fn named_schemas_are_extracted_and_overridden() {
        let (mut doc, catalog) = fixture();

        let report = apply_fixups(&mut doc, &catalog).unwrap();
        assert_eq!(report.named_schemas, 1);
        assert_eq!(report.overrides, 2);

        assert_eq!(
            doc.get("components.schemas.GetCommoditiesOkResponse.properties.data.items.$ref"),
            Some(&Value::from("#/components/schemas/CommodityDTO"))
        );
        assert_eq!(
            doc.get("components.schemas.CommodityDTO.properties.price_buy.type"),
            Some(&Value::from("number"))
        );
        assert_eq!(
            doc.get("components.schemas.CommodityDTO.required"),
            Some(&Value::Sequence(vec![Value::from("id"), Value::from("name")]))
        );
        assert!(doc.get("components.schemas.MissingDTO").is_none());
    }

    #[test]
    fn malformed_enums_are_cleaned() {
        let (mut doc, catalog) = fixture();

        let report = apply_fixups(&mut doc, &catalog).unwrap();
        assert_eq!(report.enums_normalized, 1);

        assert_eq!(
            doc.get("components.schemas.GetCommoditiesOkResponse.properties.status.enum"),
            Some(&Value::Sequence(vec![Value::from("ok")]))
        );
    }

    #[test]
    fn empty_enum_is_removed() {
        let mut value: Value = serde_yaml::from_str("type: string\nenum: [null]\n").unwrap();

        assert_eq!(normalize_enums(&mut value), 1);
        assert!(value.get("enum").is_none());
    }

    #[test]
    fn fixups_are_stable_on_rerun() {
        let (mut doc, catalog) = fixture();

        apply_fixups(&mut doc, &catalog).unwrap();
        let once = doc.root().clone();
        apply_fixups(&mut doc, &catalog).unwrap();

        assert_eq!(doc.root(), &once);
    }
}
