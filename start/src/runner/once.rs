//! Once runner: execute a command a single time during startup.

use super::{require_command, Runner, RunnerContext};
use crate::error::Result;
use crate::journal::Journal;
use crate::process::ProcessSupervisor;
use crate::unit::Unit;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct OnceRunner {
    unit: Unit,
    journal: Arc<Journal>,
    supervisor: Arc<ProcessSupervisor>,
}

impl OnceRunner {
    pub fn new(ctx: RunnerContext) -> Result<Self> {
        require_command(&ctx.unit)?;
        Ok(Self {
            unit: ctx.unit,
            journal: ctx.journal,
            supervisor: ctx.supervisor,
        })
    }
}

#[async_trait]
impl Runner for OnceRunner {
    fn name(&self) -> &str {
        &self.unit.name
    }

    async fn run(&self, _token: CancellationToken) {
        self.journal.print("runner started");
        self.supervisor.execute(&self.unit.exec, &self.journal).await;
        self.journal.print("runner stopped");
    }
}
