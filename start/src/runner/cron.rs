//! Cron runner: trigger a command on every tick of a schedule.
//!
//! Ticks are handled independently. When a triggered execution is still
//! running as the next tick fires, both run concurrently; there is no
//! per-runner lock serializing them.

use super::schedule::Schedule;
use super::{require_command, Runner, RunnerContext};
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::process::ProcessSupervisor;
use crate::unit::Unit;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct CronRunner {
    unit: Arc<Unit>,
    journal: Arc<Journal>,
    supervisor: Arc<ProcessSupervisor>,
    schedule: Schedule,
}

impl CronRunner {
    pub fn new(ctx: RunnerContext) -> Result<Self> {
        require_command(&ctx.unit)?;
        if ctx.unit.cron.is_empty() {
            return Err(Error::MissingCron(ctx.unit.name.clone()));
        }
        let schedule = Schedule::parse(&ctx.unit.cron).map_err(|reason| Error::InvalidCron {
            name: ctx.unit.name.clone(),
            expr: ctx.unit.cron.clone(),
            reason,
        })?;

        Ok(Self {
            unit: Arc::new(ctx.unit),
            journal: ctx.journal,
            supervisor: ctx.supervisor,
            schedule,
        })
    }

    fn trigger(&self, executions: &mut JoinSet<()>) {
        let unit = Arc::clone(&self.unit);
        let journal = Arc::clone(&self.journal);
        let supervisor = Arc::clone(&self.supervisor);

        executions.spawn(async move {
            journal.print("cron triggered");
            supervisor.execute(&unit.exec, &journal).await;
            journal.print("cron finished");
        });
    }
}

#[async_trait]
impl Runner for CronRunner {
    fn name(&self) -> &str {
        &self.unit.name
    }

    async fn run(&self, token: CancellationToken) {
        self.journal.print("runner started");

        let mut ticker = self.schedule.ticker();
        let mut executions = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.trigger(&mut executions),
                Some(_) = executions.join_next(), if !executions.is_empty() => {}
            }
        }

        // stopping the schedule waits for executions in flight
        while executions.join_next().await.is_some() {}

        self.journal.print("runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(dir: &TempDir, cron: &str, command: &str) -> RunnerContext {
        let mut unit = Unit::new(
            "job",
            UnitKind::Cron,
            vec!["sh".into(), "-c".into(), command.to_string()],
        );
        unit.cron = cron.to_string();
        let journal = Journal::new(dir.path(), &unit.canonical_name(), &unit.name)
            .unwrap()
            .without_console();
        RunnerContext {
            unit,
            journal: Arc::new(journal),
            supervisor: Arc::new(ProcessSupervisor::new()),
        }
    }

    #[test]
    fn test_construction_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CronRunner::new(context(&dir, "", "true")),
            Err(Error::MissingCron(_))
        ));
        assert!(matches!(
            CronRunner::new(context(&dir, "every day", "true")),
            Err(Error::InvalidCron { .. })
        ));
    }

    #[tokio::test]
    async fn test_overlapping_triggers() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("started");
        let command = format!("echo start >> {}; sleep 1", marker.display());
        let runner = Arc::new(CronRunner::new(context(&dir, "@every 200ms", &command)).unwrap());
        let token = CancellationToken::new();

        let handle = {
            let runner = Arc::clone(&runner);
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };
        tokio::time::sleep(Duration::from_millis(700)).await;

        // each execution lasts a second, so these started while others ran
        let started = std::fs::read_to_string(&marker).unwrap();
        assert!(started.lines().count() >= 2);
        assert!(runner.supervisor.pids().await.len() >= 2);

        token.cancel();
        handle.await.unwrap();
        assert!(runner.supervisor.pids().await.is_empty());
    }
}
