use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;

/// On-disk response cache keyed by request path and query.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

fn sanitize(part: &str) -> String {
    part.trim_matches('/')
        .replace('/', "-")
        .replace('?', "__")
        .replace('=', "--")
        .replace('&', "__")
}

/// `/commodities_prices/id_commodity/33/?x=1&y=2` →
/// `commodities_prices-id_commodity-33__x--1__y--2`
pub fn cache_key(path_and_query: &str) -> String {
    let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query, ""));
    let path = sanitize(path);
    let query = sanitize(query);
    if query.is_empty() {
        path
    } else {
        format!("{}__{}", path, query)
    }
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, path_and_query: &str) -> PathBuf {
        let extension = if path_and_query.contains("documentation") { "html" } else { "json" };
        let key = cache_key(path_and_query);
        let key = if key.is_empty() { "index".to_string() } else { key };
        self.dir.join(format!("{}.{}", key, extension))
    }

    pub fn get(&self, path_and_query: &str) -> Option<String> {
        let path = self.entry_path(path_and_query);
        let content = std::fs::read_to_string(&path).ok()?;
        debug!(path = %path.display(), "cache hit");
        Some(content)
    }

    pub fn put(&self, path_and_query: &str, body: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.entry_path(path_and_query), body)?;
        Ok(())
    }
}
