//! Orchestrator: load units, build runners and sequence startup/shutdown.
//!
//! Startup runs every level 1 runner, then every level 2 runner, each to
//! completion and in load order. Level 3 runners are then started
//! together and share one cancellation token.
//!
//! Shutdown, on SIGINT or SIGTERM:
//!
//! 1. cancel the shared token
//! 2. wait the grace period
//! 3. forward the received signal to every child still tracked
//! 4. wait for every level 3 runner to return

use crate::error::Result;
use crate::journal::Journal;
use crate::loaders::{self, LoaderRegistry, UnitFilter};
use crate::process::ProcessSupervisor;
use crate::reaper;
use crate::runner::{create_runner, Runner, RunnerContext};
use crate::unit::{validate_units, RunnerLevel, Unit, RESERVED_NAME};
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between cancelling runners and signalling leftover children.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Runners grouped by level, each group in load order.
pub type Runners = BTreeMap<RunnerLevel, Vec<Box<dyn Runner>>>;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Directory holding unit files
    pub unit_dir: PathBuf,
    /// Directory for journal files
    pub log_dir: PathBuf,
    /// Exit after startup when there is no level 3 runner
    pub quick_exit: bool,
    /// Trailing command line, run as the `arg-main` daemon
    pub main_args: Vec<String>,
    pub grace_period: Duration,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/minit.d"),
            log_dir: PathBuf::from("/var/log/minit"),
            quick_exit: false,
            main_args: Vec::new(),
            grace_period: GRACE_PERIOD,
        }
    }
}

/// SIGINT/SIGTERM listener.
///
/// Handlers are installed on creation, so signals arriving during startup
/// are not lost.
pub struct ShutdownSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigint.recv() => Signal::SIGINT,
            _ = self.sigterm.recv() => Signal::SIGTERM,
        }
    }
}

/// The supervisor.
pub struct Init {
    config: InitConfig,
    supervisor: Arc<ProcessSupervisor>,
    journal: Arc<Journal>,
    registry: LoaderRegistry,
    filter: UnitFilter,
}

impl Init {
    /// Create the supervisor and its own `minit` journal in the log dir.
    pub fn new(config: InitConfig) -> Result<Self> {
        let journal = Journal::new(&config.log_dir, RESERVED_NAME, RESERVED_NAME)?;
        Ok(Self::with_journal(config, journal))
    }

    /// Create the supervisor around an existing journal.
    pub fn with_journal(config: InitConfig, journal: Journal) -> Self {
        Self {
            config,
            supervisor: Arc::new(ProcessSupervisor::new()),
            journal: Arc::new(journal),
            registry: LoaderRegistry::new(),
            filter: UnitFilter::from_env(),
        }
    }

    /// Replace the enable/disable filter.
    pub fn with_filter(mut self, filter: UnitFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &InitConfig {
        &self.config
    }

    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }

    pub fn supervisor(&self) -> Arc<ProcessSupervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Load and validate every unit.
    pub fn load_units(&self) -> Result<Vec<Unit>> {
        let units = loaders::load_all(
            &self.registry,
            &self.config.unit_dir,
            &self.filter,
            &self.config.main_args,
        )?;
        validate_units(&units)?;

        for unit in &units {
            self.journal
                .print(format!("loaded unit {}", unit.canonical_name()));
        }
        Ok(units)
    }

    /// Build one runner per unit, each with its own journal.
    pub fn build_runners(&self, units: Vec<Unit>) -> Result<Runners> {
        let mut runners = Runners::new();

        for unit in units {
            let journal = Journal::new(&self.config.log_dir, &unit.canonical_name(), &unit.name)?;
            let (level, runner) = create_runner(RunnerContext {
                unit,
                journal: Arc::new(journal),
                supervisor: Arc::clone(&self.supervisor),
            })?;
            runners.entry(level).or_default().push(runner);
        }

        Ok(runners)
    }

    /// Load, build and run until SIGINT or SIGTERM.
    pub async fn run(&self) -> Result<()> {
        let mut signals = ShutdownSignals::new()?;
        let units = self.load_units()?;
        let runners = self.build_runners(units)?;
        self.start(runners, signals.recv()).await;
        Ok(())
    }

    /// Run `runners` by level, then shut down once `shutdown` resolves.
    pub async fn start<F>(&self, mut runners: Runners, shutdown: F)
    where
        F: Future<Output = Signal>,
    {
        for level in [RunnerLevel::L1, RunnerLevel::L2] {
            for runner in runners.remove(&level).unwrap_or_default() {
                debug!(unit = runner.name(), level = ?level, "Running unit");
                runner.run(CancellationToken::new()).await;
            }
        }

        let daemons = runners.remove(&RunnerLevel::L3).unwrap_or_default();
        if daemons.is_empty() && self.config.quick_exit {
            self.journal.print("no L3 runners, exiting");
            return;
        }

        let token = CancellationToken::new();
        let mut set = JoinSet::new();
        for runner in daemons {
            let token = token.clone();
            set.spawn(async move { runner.run(token).await });
        }

        let reaper_token = CancellationToken::new();
        let reaper = (std::process::id() == 1).then(|| {
            let supervisor = Arc::clone(&self.supervisor);
            let token = reaper_token.clone();
            tokio::spawn(async move {
                if let Err(e) = reaper::run(supervisor, token).await {
                    warn!(error = %e, "Orphan reaper failed");
                }
            })
        });

        self.journal.print("started");
        info!(runners = set.len(), "Supervisor started");

        let sig = shutdown.await;
        self.journal.print(format!("received signal: {}", sig));

        token.cancel();
        tokio::time::sleep(self.config.grace_period).await;
        self.supervisor.signal_all(sig).await;

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "Runner task failed");
            }
        }

        reaper_token.cancel();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        info!("Supervisor stopped");
    }
}
