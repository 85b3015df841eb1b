//! Error types for the minit supervision engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for supervision engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading units, building runners or
/// preparing the host.
///
/// Execution failures of child processes are deliberately absent: they are
/// written to the unit journal and never propagated.
#[derive(Error, Debug)]
pub enum Error {
    /// Unit has no name
    #[error("unit name is missing, check the name field")]
    MissingUnitName,

    /// Unit name does not match the naming rule
    #[error("unit name {0} is invalid, check the name field")]
    InvalidUnitName(String),

    /// Unit name appears more than once
    #[error("unit name {0} is duplicated, check the name field")]
    DuplicateUnit(String),

    /// Unit kind has no runner
    #[error("unit {name} has unknown kind {kind}, check the kind field")]
    UnknownKind { name: String, kind: String },

    /// Unit needs a command but has none
    #[error("unit {0} has no command, check the command field")]
    MissingCommand(String),

    /// Unit needs file globs but has none
    #[error("unit {0} has no files, check the files field")]
    MissingFiles(String),

    /// Cron unit without an expression
    #[error("unit {0} has no cron expression, check the cron field")]
    MissingCron(String),

    /// Cron expression failed to parse
    #[error("unit {name} has an invalid cron expression {expr}: {reason}")]
    InvalidCron {
        name: String,
        expr: String,
        reason: String,
    },

    /// Logrotate unit with an unsupported mode
    #[error("unit {name} has unknown logrotate mode {mode:?}")]
    UnknownRotationMode { name: String, mode: String },

    /// Shell string could not be tokenized
    #[error("cannot split shell arguments: {0}")]
    ShellSplit(String),

    /// Unit file could not be decoded
    #[error("cannot parse unit file {}: {reason}", .path.display())]
    UnitFile { path: PathBuf, reason: String },

    /// Host setup failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),
}
