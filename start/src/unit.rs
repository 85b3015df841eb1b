//! Unit descriptors and their validation.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

/// Group assigned to units that do not declare one.
pub const DEFAULT_GROUP: &str = "default";

/// Name reserved for the supervisor's own journal.
pub const RESERVED_NAME: &str = "minit";

/// Kind of unit, which selects the runner that supervises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Render template files in place
    Render,
    /// Run a command once at startup
    Once,
    /// Keep a command running, restarting it on exit
    Daemon,
    /// Run a command on a schedule
    Cron,
    /// Rotate log files on disk
    Logrotate,
}

impl UnitKind {
    /// Startup ordering level of this kind.
    pub fn level(&self) -> RunnerLevel {
        match self {
            UnitKind::Render => RunnerLevel::L1,
            UnitKind::Once => RunnerLevel::L2,
            UnitKind::Daemon | UnitKind::Cron | UnitKind::Logrotate => RunnerLevel::L3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Render => "render",
            UnitKind::Once => "once",
            UnitKind::Daemon => "daemon",
            UnitKind::Cron => "cron",
            UnitKind::Logrotate => "logrotate",
        }
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "render" => Ok(UnitKind::Render),
            "once" => Ok(UnitKind::Once),
            "daemon" => Ok(UnitKind::Daemon),
            "cron" => Ok(UnitKind::Cron),
            "logrotate" => Ok(UnitKind::Logrotate),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup/shutdown ordering class.
///
/// L1 runs to completion before L2, L2 before any L3 runner starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunnerLevel {
    L1,
    L2,
    L3,
}

/// How to launch a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Working directory of the child
    pub dir: Option<PathBuf>,
    /// Shell interpreter, e.g. `bash` or `/bin/sh -e`
    pub shell: Option<String>,
    /// Command line, or script lines when a shell is set
    pub command: Vec<String>,
}

/// A declarative description of one piece of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Unit {
    /// Unique unit name
    pub name: String,
    /// Group used by enable/disable filters
    pub group: String,
    /// Unit kind, kept as text until the runner is built
    pub kind: String,
    /// Number of replicas, 0 means a single unnumbered unit
    pub count: u32,
    /// Execution parameters
    #[serde(flatten)]
    pub exec: ExecuteOptions,
    /// Keep rendered output untouched (render)
    pub raw: bool,
    /// File globs (render, logrotate)
    pub files: Vec<String>,
    /// Schedule expression (cron)
    pub cron: String,
    /// Rotation mode (logrotate)
    pub mode: String,
    /// Number of archives to keep (logrotate)
    pub keep: usize,
}

impl Unit {
    /// Create a unit with a name, kind and command.
    pub fn new(name: impl Into<String>, kind: UnitKind, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
            kind: kind.as_str().to_string(),
            exec: ExecuteOptions {
                command,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// `<kind>/<name>`, used as the journal prefix.
    pub fn canonical_name(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// Trim whitespace off text fields and fill in the default group.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.kind = self.kind.trim().to_string();
        self.cron = self.cron.trim().to_string();
        self.mode = self.mode.trim().to_string();
        self.group = self.group.trim().to_string();
        if self.group.is_empty() {
            self.group = DEFAULT_GROUP.to_string();
        }
        self.exec.dir = self
            .exec
            .dir
            .take()
            .map(|d| PathBuf::from(d.to_string_lossy().trim()))
            .filter(|d| !d.as_os_str().is_empty());
        self.exec.shell = self
            .exec
            .shell
            .take()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*[A-Za-z0-9]$").expect("unit name pattern is valid")
    })
}

/// Check whether a unit name follows the naming rule.
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Validate names across all loaded units.
///
/// Fails on the first missing, malformed, reserved or duplicated name.
pub fn validate_units(units: &[Unit]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(RESERVED_NAME);

    for unit in units {
        if unit.name.is_empty() {
            return Err(Error::MissingUnitName);
        }
        if !is_valid_name(&unit.name) {
            return Err(Error::InvalidUnitName(unit.name.clone()));
        }
        if !seen.insert(unit.name.as_str()) {
            return Err(Error::DuplicateUnit(unit.name.clone()));
        }
    }

    Ok(())
}
