//! Legacy-URL redirect table.
//!
//! Loaded once at startup from a JSON list of `[source, target]` pairs and
//! shared read-only between connections.

use crate::error::ServerError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    entries: HashMap<String, String>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later pairs win over earlier ones with the same source.
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(source, target)| (source.into(), target.into()))
                .collect(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ServerError> {
        let pairs: Vec<(String, String)> = serde_json::from_str(content)
            .map_err(|e| ServerError::Redirects(format!("expected a list of [source, target] pairs: {}", e)))?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Redirects(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Loads the table if a path is given. A broken file only costs the
    /// redirects, never the server.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("No redirect file configured");
            return Self::new();
        };

        match Self::from_file(path) {
            Ok(table) => {
                info!("Loaded {} redirects from {}", table.len(), path.display());
                table
            }
            Err(e) => {
                warn!("Ignoring redirects: {}", e);
                Self::new()
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parses_pair_list() {
        let table = RedirectTable::from_json(
            r#"[["/old/code", "/us/code"], ["/about.html", "/about"]]"#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("/old/code"), Some("/us/code"));
        assert_eq!(table.get("/about.html"), Some("/about"));
        assert_eq!(table.get("/us/code"), None);
    }

    #[test]
    fn test_later_duplicate_wins() {
        let table = RedirectTable::from_json(r#"[["/a", "/first"], ["/a", "/second"]]"#).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/a"), Some("/second"));
    }

    #[test]
    fn test_rejects_non_pair_entries() {
        assert!(RedirectTable::from_json(r#"{"/a": "/b"}"#).is_err());
        assert!(RedirectTable::from_json(r#"[["/a"]]"#).is_err());
    }

    #[test]
    fn test_load_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let broken = temp_dir.path().join("redirects.json");
        std::fs::write(&broken, "not json").unwrap();

        assert!(RedirectTable::load(None).is_empty());
        assert!(RedirectTable::load(Some(&broken)).is_empty());
        assert!(RedirectTable::load(Some(&temp_dir.path().join("missing.json"))).is_empty());
    }

    #[test]
    fn test_load_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("redirects.json");
        std::fs::write(&path, r#"[["/old", "/new"]]"#).unwrap();

        let table = RedirectTable::load(Some(&path));
        assert_eq!(table.get("/old"), Some("/new"));
    }
}
