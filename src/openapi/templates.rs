//! Path templating.
//!
//! Collapses concrete captured paths (`/commodities/1`, `/commodities/2`)
//! into parameterized templates (`/commodities/{id}`) so that each template
//! carries a single operation per method. The applied templates are written
//! to `x-path-templates`, which the converter consults on its example pass.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::{Mapping, Sequence, Value};
use tracing::{debug, info, warn};

use super::document::{merge_missing, OpenApiDocument};
use crate::error::Result;

pub const PATH_TEMPLATES_KEY: &str = "x-path-templates";
const IGNORE_PREFIX: &str = "ignore:";
const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    template: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = split_segments(template)
            .map(|s| match s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();

        Self {
            template: template.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn is_parameterized(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(_)))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Parameter values taken from `path`, or `None` when it does not match.
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        let parts: Vec<&str> = split_segments(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal != part => return None,
                Segment::Literal(_) => {}
                Segment::Param(name) => captured.push((name.as_str(), part)),
            }
        }
        Some(captured)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty())
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("valid regex"))
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("valid regex")
    })
}

/// Whether a path segment looks like a record identifier rather than a
/// resource name.
pub fn is_identifier(segment: &str) -> bool {
    if numeric_re().is_match(segment) || uuid_re().is_match(segment) {
        return true;
    }

    segment.len() >= 8
        && segment.chars().all(|c| c.is_ascii_alphanumeric())
        && segment.chars().any(|c| c.is_ascii_digit())
        && segment.chars().any(|c| c.is_ascii_uppercase())
        && segment.chars().any(|c| c.is_ascii_lowercase())
}

/// Replaces identifier-like segments of `path` with placeholders. Returns
/// `None` when nothing looks like an identifier.
pub fn infer_template(path: &str) -> Option<String> {
    let parts: Vec<&str> = split_segments(path).collect();
    let mut used: Vec<String> = Vec::new();
    let mut replaced = false;
    let mut out = Vec::with_capacity(parts.len());

    for (i, part) in parts.iter().enumerate() {
        if !is_identifier(part) {
            out.push(part.to_string());
            continue;
        }

        let base = match i.checked_sub(1).map(|p| parts[p]) {
            Some(prev) if prev.starts_with("id_") && !is_identifier(prev) => prev.to_string(),
            _ => "id".to_string(),
        };
        let mut name = base.clone();
        let mut n = 2;
        while used.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        out.push(format!("{{{}}}", name));
        used.push(name);
        replaced = true;
    }

    if !replaced {
        return None;
    }

    let mut template = format!("/{}", out.join("/"));
    if path.ends_with('/') {
        template.push('/');
    }
    Some(template)
}

/// Observed literal path → applied template.
#[derive(Debug, Default, Clone)]
pub struct PathTemplateMapping {
    entries: BTreeMap<String, String>,
}

impl PathTemplateMapping {
    pub fn template_for(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Rewrites the document's paths onto templates.
///
/// `declared` templates are tried first, then templates inferred from the
/// document's own paths. The first matching template wins.
pub fn apply_path_templates(
    doc: &mut OpenApiDocument,
    declared: &[String],
) -> Result<PathTemplateMapping> {
    let paths = doc.take_paths()?;

    let mut templates: Vec<PathTemplate> = declared
        .iter()
        .map(String::as_str)
        .chain(active_templates(doc).iter().map(String::as_str))
        .map(PathTemplate::parse)
        .collect();
    for path in paths.keys().filter_map(Value::as_str) {
        if templates.iter().any(|t| t.matches(path)) {
            continue;
        }
        if let Some(inferred) = infer_template(path) {
            debug!(path, template = %inferred, "inferred path template");
            templates.push(PathTemplate::parse(&inferred));
        }
    }

    let mut mapping = PathTemplateMapping::default();
    let mut observed: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    let mut collapsed = Mapping::new();

    for (key, item) in paths {
        let Some(path) = key.as_str() else {
            collapsed.insert(key, item);
            continue;
        };

        let template = templates
            .iter()
            .find(|t| t.is_parameterized() && t.matches(path));
        let target = match template {
            Some(t) if t.as_str() == path => path.to_string(),
            Some(t) => {
                let values = observed.entry(t.as_str().to_string()).or_default();
                for (name, value) in t.captures(path).unwrap_or_default() {
                    values.entry(name.to_string()).or_default().push(value.to_string());
                }
                mapping.entries.insert(path.to_string(), t.as_str().to_string());
                t.as_str().to_string()
            }
            None => path.to_string(),
        };

        let target = Value::from(target);
        if let Some(existing) = collapsed.get_mut(&target) {
            match (existing, item) {
                (Value::Mapping(existing), Value::Mapping(incoming)) => {
                    merge_missing(existing, &incoming)
                }
                _ => warn!(path, "dropping non-mapping path item"),
            }
        } else {
            collapsed.insert(target, item);
        }
    }

    for (template, params) in &observed {
        if let Some(Value::Mapping(item)) = collapsed.get_mut(template.as_str()) {
            add_path_parameters(item, params);
        }
    }

    let used: Vec<String> = templates
        .iter()
        .filter(|t| t.is_parameterized())
        .map(|t| t.as_str().to_string())
        .collect();
    update_template_list(doc, &used);

    *doc.paths_mut()? = collapsed;
    info!(
        collapsed = mapping.len(),
        templates = used.len(),
        "applied path templates"
    );
    Ok(mapping)
}

fn add_path_parameters(item: &mut Mapping, observed: &BTreeMap<String, Vec<String>>) {
    for method in HTTP_METHODS {
        let Some(Value::Mapping(operation)) = item.get_mut(method) else {
            continue;
        };

        let parameters = operation
            .entry(Value::from("parameters"))
            .or_insert_with(|| Value::Sequence(Sequence::new()));
        let Value::Sequence(parameters) = parameters else {
            continue;
        };

        for (name, values) in observed {
            let declared = parameters.iter().any(|p| {
                p.get("name").and_then(Value::as_str) == Some(name.as_str())
                    && p.get("in").and_then(Value::as_str) == Some("path")
            });
            if declared {
                continue;
            }

            let param_type = if values.iter().all(|v| numeric_re().is_match(v)) {
                "integer"
            } else {
                "string"
            };
            let mut schema = Mapping::new();
            schema.insert(Value::from("type"), Value::from(param_type));

            let mut parameter = Mapping::new();
            parameter.insert(Value::from("name"), Value::from(name.as_str()));
            parameter.insert(Value::from("in"), Value::from("path"));
            parameter.insert(Value::from("required"), Value::from(true));
            parameter.insert(Value::from("schema"), Value::Mapping(schema));
            parameters.push(Value::Mapping(parameter));
        }
    }
}

fn recorded_templates(doc: &OpenApiDocument) -> Vec<String> {
    doc.root()
        .get(PATH_TEMPLATES_KEY)
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn active_templates(doc: &OpenApiDocument) -> Vec<String> {
    recorded_templates(doc)
        .into_iter()
        .filter(|t| !t.starts_with(IGNORE_PREFIX))
        .collect()
}

fn update_template_list(doc: &mut OpenApiDocument, applied: &[String]) {
    let existing = recorded_templates(doc);

    let mut list: Vec<String> = Vec::with_capacity(applied.len() + existing.len());
    for template in applied.iter().chain(existing.iter()) {
        let bare = template.strip_prefix(IGNORE_PREFIX).unwrap_or(template);
        let superseded = template.starts_with(IGNORE_PREFIX) && applied.iter().any(|a| a == bare);
        if !superseded && !list.contains(template) {
            list.push(template.clone());
        }
    }

    if let Some(root) = doc.root_mut().as_mapping_mut() {
        root.insert(
            Value::from(PATH_TEMPLATES_KEY),
            Value::Sequence(list.into_iter().map(Value::from).collect()),
        );
    }
}

/// Paths that still look concrete and are not covered by any active entry of
/// `x-path-templates`. A non-empty result after the example pass means the
/// converter attached samples to paths templating did not anticipate.
pub fn untemplated_paths(doc: &OpenApiDocument) -> Vec<String> {
    let templates: Vec<PathTemplate> = active_templates(doc)
        .iter()
        .map(|t| PathTemplate::parse(t))
        .collect();

    doc.paths()
        .map(|paths| {
            paths
                .keys()
                .filter_map(Value::as_str)
                .filter(|p| infer_template(p).is_some())
                .filter(|p| !templates.iter().any(|t| t.matches(p)))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
