//! YAML unit files: one unit per document.

use super::UnitLoader;
use crate::error::{Error, Result};
use crate::unit::Unit;
use serde::Deserialize;
use std::path::Path;

/// Loader for multi-document `.yml` / `.yaml` files.
pub struct YamlLoader;

impl YamlLoader {
    /// Parse units from YAML text. Empty documents are skipped.
    pub fn parse(content: &str) -> std::result::Result<Vec<Unit>, serde_yaml::Error> {
        let mut units = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            if let Some(unit) = Option::<Unit>::deserialize(document)? {
                units.push(unit);
            }
        }
        Ok(units)
    }
}

impl UnitLoader for YamlLoader {
    fn load(&self, path: &Path) -> Result<Vec<Unit>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| Error::UnitFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yml", "yaml"]
    }

    fn name(&self) -> &'static str {
        "yaml"
    }
}
