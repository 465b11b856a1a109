use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// An OpenAPI document kept as raw YAML so that unknown sections survive
/// every pass untouched.
#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    path: PathBuf,
    root: Value,
}

impl OpenApiDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let root = if content.trim().is_empty() {
            empty_document()
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| PipelineError::transform(path, e.to_string()))?
        };

        if !root.is_mapping() {
            return Err(PipelineError::transform(path, "document root is not a mapping"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn from_value(path: impl Into<PathBuf>, root: Value) -> Self {
        Self {
            path: path.into(),
            root,
        }
    }

    /// Writes through a sibling temp file so a failure never clobbers the
    /// previous version.
    pub fn write(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.root)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "wrote document");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn get(&self, dotted: &str) -> Option<&Value> {
        lookup(&self.root, &split_keys(dotted))
    }

    pub fn paths(&self) -> Option<&Mapping> {
        self.root.get("paths").and_then(Value::as_mapping)
    }

    pub fn paths_mut(&mut self) -> Result<&mut Mapping> {
        let path = self.path.clone();
        entry_mut(&mut self.root, &["paths"])
            .map_err(|reason| PipelineError::transform(&path, reason))?
            .as_mapping_mut()
            .ok_or_else(|| PipelineError::transform(&path, "paths is not a mapping"))
    }

    pub fn schemas_mut(&mut self) -> Result<&mut Mapping> {
        let path = self.path.clone();
        entry_mut(&mut self.root, &["components", "schemas"])
            .map_err(|reason| PipelineError::transform(&path, reason))?
            .as_mapping_mut()
            .ok_or_else(|| PipelineError::transform(&path, "components.schemas is not a mapping"))
    }

    pub fn take_paths(&mut self) -> Result<Mapping> {
        Ok(std::mem::take(self.paths_mut()?))
    }
}

pub fn empty_document() -> Value {
    let mut root = Mapping::new();
    root.insert(Value::from("paths"), Value::Mapping(Mapping::new()));
    Value::Mapping(root)
}

pub fn split_keys(dotted: &str) -> Vec<&str> {
    dotted.split('.').filter(|k| !k.is_empty()).collect()
}

pub fn lookup<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |current, key| current.get(*key))
}

pub fn lookup_mut<'a>(value: &'a mut Value, keys: &[&str]) -> Option<&'a mut Value> {
    let mut current = value;
    for key in keys {
        current = current.get_mut(*key)?;
    }
    Some(current)
}

/// Walks `keys`, creating empty mappings for missing levels. Fails when an
/// intermediate value exists but is not a mapping.
pub fn entry_mut<'a>(
    value: &'a mut Value,
    keys: &[&str],
) -> std::result::Result<&'a mut Value, String> {
    let mut current = value;
    for key in keys {
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        let mapping = current
            .as_mapping_mut()
            .ok_or_else(|| format!("expected a mapping at {}", key))?;
        current = mapping
            .entry(Value::from(*key))
            .or_insert(Value::Null);
    }
    Ok(current)
}

/// Removes the value at `keys`, returning it.
pub fn remove(value: &mut Value, keys: &[&str]) -> Option<Value> {
    let (last, parents) = keys.split_last()?;
    let mut current = value;
    for key in parents {
        current = current.get_mut(*key)?;
    }
    current.as_mapping_mut()?.remove(*last)
}

/// Copies every key of `src` that `dst` lacks, recursing into nested
/// mappings. Existing scalar and sequence values in `dst` win.
pub fn merge_missing(dst: &mut Mapping, src: &Mapping) {
    for (key, value) in src {
        match dst.get_mut(key) {
            None => {
                dst.insert(key.clone(), value.clone());
            }
            Some(Value::Mapping(existing)) => {
                if let Value::Mapping(incoming) = value {
                    merge_missing(existing, incoming);
                }
            }
            Some(_) => {}
        }
    }
}

/// Overwrites `dst` with `src` key by key, recursing into nested mappings.
pub fn merge_overwrite(dst: &mut Mapping, src: &Mapping) {
    for (key, value) in src {
        if let (Some(Value::Mapping(existing)), Value::Mapping(incoming)) =
            (dst.get_mut(key), value)
        {
            merge_overwrite(existing, incoming);
            continue;
        }
        dst.insert(key.clone(), value.clone());
    }
}
