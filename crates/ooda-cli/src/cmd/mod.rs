pub mod action;
pub mod alert;
pub mod anomaly;
pub mod config;
pub mod cycle;
pub mod init;
pub mod strategy;

use anyhow::Context;
use ooda_core::config::Config;
use ooda_core::store::Store;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// An initialized project: its config and an open store.
pub struct Project {
    pub config: Config,
    pub store: Arc<Store>,
}

impl Project {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load config")?;
        let store = Store::open_project(root).context("failed to open store")?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }
}

/// Parse a JSON argument. `@path` reads the document from a file.
pub fn read_json(arg: &str) -> anyhow::Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
        }
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("invalid JSON")
}

pub fn parse_id(s: &str) -> anyhow::Result<uuid::Uuid> {
    s.parse()
        .with_context(|| format!("'{s}' is not a valid id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_json_inline_and_file() {
        assert_eq!(read_json(r#"{"a": 1}"#).unwrap()["a"], 1);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("obs.json");
        std::fs::write(&path, r#"{"keywords": []}"#).unwrap();
        let v = read_json(&format!("@{}", path.display())).unwrap();
        assert!(v["keywords"].is_array());

        assert!(read_json("{not json").is_err());
    }

    #[test]
    fn open_uninitialized_project_fails() {
        let dir = TempDir::new().unwrap();
        let err = Project::open(dir.path()).err().unwrap();
        assert!(format!("{err:#}").contains("not initialized"));
    }
}
