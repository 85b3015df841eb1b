//! minit binary.
//!
//! Runs as the container entry point: prepares the host, loads units from
//! the unit directory, the environment and trailing arguments, then
//! supervises them until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use start::journal::timestamp;
use start::setup::setup_host;
use start::unit::RESERVED_NAME;
use start::{Init, InitConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "minit",
    about = "A minimal init process for containers",
    version,
    author
)]
struct Cli {
    /// Directory holding unit files
    #[arg(long, env = "MINIT_UNIT_DIR", default_value = "/etc/minit.d")]
    unit_dir: PathBuf,

    /// Directory for unit journals
    #[arg(long, env = "MINIT_LOG_DIR", default_value = "/var/log/minit")]
    log_dir: PathBuf,

    /// Exit once startup is done if there is no daemon, cron or logrotate unit
    #[arg(long, env = "MINIT_QUICK_EXIT")]
    quick_exit: bool,

    /// Command run as the `arg-main` daemon unit
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => println!("{} [{}] exited", timestamp(), RESERVED_NAME),
        Err(e) => {
            eprintln!(
                "{} [{}] exited with error: {:#}",
                timestamp(),
                RESERVED_NAME,
                e
            );
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    std::fs::create_dir_all(&cli.unit_dir)
        .with_context(|| format!("cannot create unit dir {}", cli.unit_dir.display()))?;
    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("cannot create log dir {}", cli.log_dir.display()))?;

    let config = InitConfig {
        unit_dir: cli.unit_dir,
        log_dir: cli.log_dir,
        quick_exit: cli.quick_exit,
        main_args: cli.command,
        ..Default::default()
    };
    info!(
        unit_dir = %config.unit_dir.display(),
        log_dir = %config.log_dir.display(),
        "Starting minit"
    );

    let init = Init::new(config).context("cannot open minit journal")?;
    setup_host(&init.journal()).context("host setup failed")?;
    init.run().await?;

    Ok(())
}
