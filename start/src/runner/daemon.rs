//! Daemon runner: keep a command running, restarting it after every exit.

use super::{require_command, Runner, RunnerContext};
use crate::error::Result;
use crate::journal::Journal;
use crate::process::ProcessSupervisor;
use crate::unit::Unit;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause between an exit and the next start.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Supervision state of a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// The child is running, or failing to start
    Running,
    /// Waiting out the restart delay
    Backoff,
    /// Cancelled; terminal
    Stopped,
}

/// Restart-on-exit runner.
pub struct DaemonRunner {
    unit: Unit,
    journal: Arc<Journal>,
    supervisor: Arc<ProcessSupervisor>,
    restart_delay: Duration,
}

impl DaemonRunner {
    pub fn new(ctx: RunnerContext) -> Result<Self> {
        require_command(&ctx.unit)?;
        Ok(Self {
            unit: ctx.unit,
            journal: ctx.journal,
            supervisor: ctx.supervisor,
            restart_delay: RESTART_DELAY,
        })
    }

    /// Override the restart delay.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    async fn step(&self, state: DaemonState, token: &CancellationToken) -> DaemonState {
        match state {
            DaemonState::Running => {
                self.supervisor.execute(&self.unit.exec, &self.journal).await;
                if token.is_cancelled() {
                    DaemonState::Stopped
                } else {
                    DaemonState::Backoff
                }
            }
            DaemonState::Backoff => {
                self.journal.print(format!(
                    "restarting in {}",
                    humantime::format_duration(self.restart_delay)
                ));
                tokio::select! {
                    _ = tokio::time::sleep(self.restart_delay) => DaemonState::Running,
                    _ = token.cancelled() => DaemonState::Stopped,
                }
            }
            DaemonState::Stopped => DaemonState::Stopped,
        }
    }
}

#[async_trait]
impl Runner for DaemonRunner {
    fn name(&self) -> &str {
        &self.unit.name
    }

    async fn run(&self, token: CancellationToken) {
        self.journal.print("runner started");

        let mut state = if token.is_cancelled() {
            DaemonState::Stopped
        } else {
            DaemonState::Running
        };
        while state != DaemonState::Stopped {
            state = self.step(state, &token).await;
        }

        self.journal.print("runner stopped");
    }
}
