//! Runners: the supervision behaviour instantiated for one unit.
//!
//! Each [`UnitKind`] maps to one runner type and one [`RunnerLevel`].
//! A runner owns its unit and journal and shares the process supervisor;
//! [`Runner::run`] returns once the runner has stopped.

pub mod cron;
pub mod daemon;
pub mod logrotate;
pub mod once;
pub mod render;
pub mod schedule;

use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::process::ProcessSupervisor;
use crate::unit::{RunnerLevel, Unit, UnitKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use self::cron::CronRunner;
pub use self::daemon::DaemonRunner;
pub use self::logrotate::LogrotateRunner;
pub use self::once::OnceRunner;
pub use self::render::RenderRunner;

/// Capability shared by every unit kind: run until told to stop.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Name of the unit this runner supervises.
    fn name(&self) -> &str;

    /// Run the unit.
    ///
    /// Level 1 and 2 runners return when their work is done and ignore
    /// `token`. Level 3 runners return after `token` is cancelled.
    async fn run(&self, token: CancellationToken);
}

/// Everything a runner constructor needs.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub unit: Unit,
    pub journal: Arc<Journal>,
    pub supervisor: Arc<ProcessSupervisor>,
}

/// Build the runner for a unit, along with its startup level.
///
/// Fails if the kind is unknown or the unit lacks what its kind requires.
pub fn create_runner(ctx: RunnerContext) -> Result<(RunnerLevel, Box<dyn Runner>)> {
    let kind: UnitKind = ctx.unit.kind.parse().map_err(|kind| Error::UnknownKind {
        name: ctx.unit.name.clone(),
        kind,
    })?;

    let runner: Box<dyn Runner> = match kind {
        UnitKind::Render => Box::new(RenderRunner::new(ctx)?),
        UnitKind::Once => Box::new(OnceRunner::new(ctx)?),
        UnitKind::Daemon => Box::new(DaemonRunner::new(ctx)?),
        UnitKind::Cron => Box::new(CronRunner::new(ctx)?),
        UnitKind::Logrotate => Box::new(LogrotateRunner::new(ctx)?),
    };

    Ok((kind.level(), runner))
}

/// Fail unless the unit declares a command.
fn require_command(unit: &Unit) -> Result<()> {
    if unit.exec.command.is_empty() {
        return Err(Error::MissingCommand(unit.name.clone()));
    }
    Ok(())
}
