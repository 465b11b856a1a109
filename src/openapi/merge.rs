use tracing::{debug, info};

use super::document::{entry_mut, lookup, remove, split_keys, OpenApiDocument};
use crate::error::{PipelineError, Result};

/// Sections owned by the hand-written base document.
pub const STATIC_SECTIONS: [&str; 6] = [
    "openapi",
    "info",
    "servers",
    "externalDocs",
    "tags",
    "components.securitySchemes",
];

/// Replaces the draft's static sections with the base document's. Paths and
/// inferred schemas are left alone, so merging twice changes nothing.
pub fn merge_base(draft: &mut OpenApiDocument, base: &OpenApiDocument) -> Result<()> {
    let path = draft.path().to_path_buf();

    for section in STATIC_SECTIONS {
        let keys = split_keys(section);
        match lookup(base.root(), &keys) {
            Some(value) => {
                debug!(section, "overwriting from base document");
                let target = entry_mut(draft.root_mut(), &keys)
                    .map_err(|reason| PipelineError::transform(&path, reason))?;
                *target = value.clone();
            }
            None => {
                if remove(draft.root_mut(), &keys).is_some() {
                    debug!(section, "removed section absent from base document");
                }
            }
        }
    }

    info!(base = %base.path().display(), "merged base document");
    Ok(())
}
