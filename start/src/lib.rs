//! minit - a minimal init process for containers.
//!
//! This crate is the supervision engine behind the `minit` binary. It
//! loads declarative units, starts them by level and supervises them until
//! a shutdown signal arrives:
//!
//! - **render** units expand template files (level 1)
//! - **once** units run a command to completion (level 2)
//! - **daemon**, **cron** and **logrotate** units run until shutdown (level 3)
//!
//! # Example
//!
//! ```no_run
//! use minit_start::{Init, InitConfig};
//!
//! #[tokio::main]
//! async fn main() -> minit_start::Result<()> {
//!     let init = Init::new(InitConfig::default())?;
//!     init.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod init;
pub mod journal;
pub mod loaders;
pub mod process;
pub mod reaper;
pub mod runner;
pub mod setup;
pub mod template;
pub mod unit;

pub use error::{Error, Result};
pub use init::{Init, InitConfig, ShutdownSignals};
pub use journal::Journal;
pub use process::ProcessSupervisor;
pub use runner::{create_runner, Runner, RunnerContext};
pub use unit::{ExecuteOptions, RunnerLevel, Unit, UnitKind};
