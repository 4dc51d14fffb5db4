//! Payload documents on disk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::parser::parse_script;
use super::types::{HidError, PayloadDocument, PayloadSummary, PayloadToken};

/// A document after parsing; parse errors are kept and reported on execute
#[derive(Debug, Clone)]
pub struct LoadedPayload {
    pub name: String,
    pub description: String,
    pub tokens: Result<Arc<Vec<PayloadToken>>, HidError>,
}

impl LoadedPayload {
    fn summary(&self) -> PayloadSummary {
        PayloadSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            valid: self.tokens.is_ok(),
            error: self.tokens.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// All `<dir>/<name>.json` documents, keyed by name
#[derive(Debug, Default)]
pub struct PayloadLibrary {
    dir: PathBuf,
    payloads: BTreeMap<String, LoadedPayload>,
}

impl PayloadLibrary {
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            payloads: BTreeMap::new(),
        }
    }

    /// Read every document in `dir`; a missing directory is an empty library
    pub fn load(dir: &Path) -> Self {
        let mut library = Self::empty(dir);

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Payload directory {} not readable: {}", dir.display(), e);
                return library;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let document = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| {
                    serde_json::from_str::<PayloadDocument>(&s).map_err(|e| e.to_string())
                }) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Skipping payload {}: {}", path.display(), e);
                    continue;
                }
            };

            let tokens = parse_script(&document.script).map(Arc::new);
            if let Err(e) = &tokens {
                warn!("Payload {} does not parse: {}", name, e);
            }
            library.payloads.insert(
                name.to_string(),
                LoadedPayload {
                    name: name.to_string(),
                    description: document.description,
                    tokens,
                },
            );
        }

        info!(
            "Loaded {} payloads from {}",
            library.payloads.len(),
            dir.display()
        );
        library
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<&LoadedPayload> {
        self.payloads.get(name)
    }

    pub fn list(&self) -> Vec<PayloadSummary> {
        self.payloads.values().map(LoadedPayload::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("hello.json"),
            r#"{"description": "Say hello", "script": "hello[ENTER]"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("broken.json"),
            r#"{"description": "Bad", "script": "[NOPE]"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("garbage.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = PayloadLibrary::load(dir.path());
        let list = library.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "broken");
        assert!(!list[0].valid);
        assert!(list[0].error.is_some());
        assert_eq!(list[1].name, "hello");
        assert!(list[1].valid);
        assert_eq!(list[1].description, "Say hello");

        let broken = library.get("broken").unwrap();
        assert_eq!(broken.tokens.as_ref().unwrap_err().code(), "invalid_token");
    }

    #[test]
    fn test_missing_directory() {
        let library = PayloadLibrary::load(Path::new("/nonexistent/payloads"));
        assert!(library.list().is_empty());
        assert!(library.get("anything").is_none());
    }
}
