//! TOML unit files: a `[[unit]]` array of tables.

use super::UnitLoader;
use crate::error::{Error, Result};
use crate::unit::Unit;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct UnitFile {
    #[serde(default)]
    unit: Vec<Unit>,
}

/// Loader for `.toml` files.
pub struct TomlLoader;

impl TomlLoader {
    pub fn parse(content: &str) -> std::result::Result<Vec<Unit>, ::toml::de::Error> {
        let file: UnitFile = ::toml::from_str(content)?;
        Ok(file.unit)
    }
}

impl UnitLoader for TomlLoader {
    fn load(&self, path: &Path) -> Result<Vec<Unit>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| Error::UnitFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn name(&self) -> &'static str {
        "toml"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        let units = TomlLoader::parse(
            r#"
[[unit]]
name = "backup"
kind = "cron"
cron = "0 3 * * *"
command = ["backup.sh", "--all"]

[[unit]]
name = "conf"
kind = "render"
raw = true
files = ["/etc/app/*.conf"]
"#,
        )
        .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].cron, "0 3 * * *");
        assert_eq!(units[0].exec.command, vec!["backup.sh", "--all"]);
        assert!(units[1].raw);
        assert_eq!(units[1].files, vec!["/etc/app/*.conf"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(TomlLoader::parse("").unwrap().is_empty());
    }
}
