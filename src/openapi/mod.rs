//! Post-processing passes over the draft OpenAPI document.
//!
//! Each pass loads the document from disk, rewrites it and writes it back.
//! A failing pass leaves the previous version of the file in place.

mod document;
mod fixup;
mod merge;
mod templates;

use std::path::Path;

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::Result;

pub use document::OpenApiDocument;
pub use fixup::{apply_fixups, FixupReport};
pub use merge::merge_base;
pub use templates::{apply_path_templates, untemplated_paths, PathTemplateMapping};

pub fn run_apply_path_templates(
    openapi_path: &Path,
    catalog: &Catalog,
) -> Result<PathTemplateMapping> {
    let mut doc = OpenApiDocument::load(openapi_path)?;
    let mapping = apply_path_templates(&mut doc, &catalog.path_templates())?;
    doc.write()?;
    for (path, template) in mapping.iter() {
        info!(path, template, "templated path");
    }
    Ok(mapping)
}

pub fn run_fixup(openapi_path: &Path, catalog: &Catalog) -> Result<FixupReport> {
    let mut doc = OpenApiDocument::load(openapi_path)?;
    let report = apply_fixups(&mut doc, catalog)?;
    doc.write()?;
    Ok(report)
}

pub fn run_merge(openapi_path: &Path, base_spec_path: &Path) -> Result<()> {
    let base = OpenApiDocument::load(base_spec_path)?;
    let mut doc = OpenApiDocument::load(openapi_path)?;
    merge_base(&mut doc, &base)?;
    doc.write()
}

/// Warns about concrete paths the example pass produced outside of any
/// recorded template. Returns how many there were.
pub fn check_template_drift(openapi_path: &Path) -> Result<usize> {
    let doc = OpenApiDocument::load(openapi_path)?;
    let drifted = untemplated_paths(&doc);
    for path in &drifted {
        warn!(path = %path, "path not covered by x-path-templates, examples may be missing");
    }
    Ok(drifted.len())
}
