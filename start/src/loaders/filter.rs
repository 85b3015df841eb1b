//! Enable/disable filtering of loaded units.
//!
//! `MINIT_ENABLE` keeps only the listed units, `MINIT_DISABLE` (consulted
//! only when `MINIT_ENABLE` is unset) drops them. Entries are separated by
//! commas; `@group` matches every unit of a group.

use crate::unit::Unit;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    None,
    Whitelist,
    Blacklist,
}

/// Name/group filter for unit files.
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    mode: FilterMode,
    entries: HashSet<String>,
}

impl UnitFilter {
    /// Filter configured from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Filter configured through an environment lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let (mode, raw) = if let Some(raw) = present("MINIT_ENABLE") {
            (FilterMode::Whitelist, raw)
        } else if let Some(raw) = present("MINIT_DISABLE") {
            (FilterMode::Blacklist, raw)
        } else {
            return Self::default();
        };

        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty() && *entry != "@")
            .map(String::from)
            .collect();

        Self { mode, entries }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    fn matches(&self, unit: &Unit) -> bool {
        self.entries.contains(&unit.name) || self.entries.contains(&format!("@{}", unit.group))
    }

    /// Whether the unit should be loaded.
    pub fn allows(&self, unit: &Unit) -> bool {
        match self.mode {
            FilterMode::None => true,
            FilterMode::Whitelist => self.matches(unit),
            FilterMode::Blacklist => !self.matches(unit),
        }
    }
}
