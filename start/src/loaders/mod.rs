//! Unit loaders for the supported file formats.
//!
//! Units come from three sources, in this order:
//!
//! - unit files in the unit directory (YAML first, then TOML)
//! - the `MINIT_MAIN*` environment variables
//! - trailing command line arguments
//!
//! Only units read from files are subject to enable/disable filtering and
//! replica expansion.

pub mod extra;
pub mod filter;
pub mod toml;
pub mod yaml;

use crate::error::{Error, Result};
use crate::unit::Unit;
use std::path::Path;
use tracing::{debug, info};

pub use self::extra::{arg_main, env_main};
pub use self::filter::UnitFilter;
pub use self::toml::TomlLoader;
pub use self::yaml::YamlLoader;

/// Trait for unit file loaders.
pub trait UnitLoader: Send + Sync {
    /// Load every unit declared in the file at `path`.
    fn load(&self, path: &Path) -> Result<Vec<Unit>>;

    /// File extensions handled by this loader, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Check if this loader supports the given file extension.
    fn supports_extension(&self, ext: &str) -> bool {
        self.extensions().contains(&ext)
    }

    /// Loader description for logging.
    fn name(&self) -> &'static str;
}

/// Registry of unit loaders, consulted in registration order.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn UnitLoader>>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderRegistry {
    /// Create a registry with the YAML and TOML loaders.
    pub fn new() -> Self {
        let mut registry = Self {
            loaders: Vec::new(),
        };
        registry.register(Box::new(YamlLoader));
        registry.register(Box::new(TomlLoader));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn UnitLoader>) {
        self.loaders.push(loader);
    }

    /// Find a loader that supports the given file extension.
    pub fn find_loader(&self, ext: &str) -> Option<&dyn UnitLoader> {
        self.loaders
            .iter()
            .find(|loader| loader.supports_extension(ext))
            .map(|b| b.as_ref())
    }

    /// Load one unit file, picking the loader by extension.
    pub fn load(&self, path: &Path) -> Result<Vec<Unit>> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let loader = self.find_loader(ext).ok_or_else(|| Error::UnitFile {
            path: path.to_path_buf(),
            reason: format!("no loader for extension {:?}", ext),
        })?;

        let mut units = loader.load(path)?;
        for unit in &mut units {
            unit.normalize();
        }
        Ok(units)
    }

    /// Load every unit file in `dir`.
    ///
    /// Files are visited per extension in sorted order, following the
    /// registration order of the loaders.
    pub fn load_dir(&self, dir: &Path) -> Result<Vec<Unit>> {
        let base = glob::Pattern::escape(&dir.to_string_lossy());
        let mut units = Vec::new();

        for loader in &self.loaders {
            for ext in loader.extensions() {
                let pattern = format!("{}/*.{}", base, ext);
                let paths = glob::glob(&pattern).map_err(|e| Error::UnitFile {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                })?;

                for path in paths {
                    let path = path.map_err(|e| Error::Io(e.into_error()))?;
                    debug!(path = %path.display(), loader = loader.name(), "Loading unit file");
                    units.extend(self.load(&path)?);
                }
            }
        }

        Ok(units)
    }
}

/// Expand `count > 0` into `<name>-1` ... `<name>-<count>`.
pub fn expand_replicas(unit: Unit) -> Vec<Unit> {
    if unit.count == 0 {
        return vec![unit];
    }

    (1..=unit.count)
        .map(|i| {
            let mut replica = unit.clone();
            replica.name = format!("{}-{}", unit.name, i);
            replica
        })
        .collect()
}

/// Load all units: unit files, filtered and expanded, then the env and
/// argument main units.
pub fn load_all(
    registry: &LoaderRegistry,
    dir: &Path,
    filter: &UnitFilter,
    args: &[String],
) -> Result<Vec<Unit>> {
    let mut units = Vec::new();

    for unit in registry.load_dir(dir)? {
        if !filter.allows(&unit) {
            info!(unit = %unit.name, "Unit disabled by filter");
            continue;
        }
        units.extend(expand_replicas(unit));
    }

    if let Some(unit) = env_main(|key| std::env::var(key).ok())? {
        units.push(unit);
    }
    if let Some(unit) = arg_main(args) {
        units.push(unit);
    }

    Ok(units)
}
