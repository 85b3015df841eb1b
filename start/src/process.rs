//! Process management for the supervision engine.
//!
//! [`ProcessSupervisor`] owns the live-process table and is the only place
//! where child processes are spawned. Every child is started in its own
//! process group, so terminal-generated signals never reach it; the
//! orchestrator forwards shutdown signals explicitly through
//! [`ProcessSupervisor::signal_all`].

use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::unit::ExecuteOptions;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Longest wait for output copies to finish once the child has exited.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Process supervisor that launches children and tracks their pids.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    /// Pids of children that were started and not yet waited for
    pids: Mutex<HashSet<u32>>,
}

impl ProcessSupervisor {
    /// Create a new process supervisor with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one child process to completion.
    ///
    /// Output is streamed into `journal`. Every failure (argument building,
    /// spawn, wait) is written to the journal; nothing is returned to the
    /// caller, which owns any retry policy.
    pub async fn execute(&self, opts: &ExecuteOptions, journal: &Arc<Journal>) {
        if let Err(e) = self.execute_inner(opts, journal).await {
            journal.error(format!("failed to start process: {}", e));
        }
    }

    async fn execute_inner(&self, opts: &ExecuteOptions, journal: &Arc<Journal>) -> Result<()> {
        let argv = build_argv(opts)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ShellSplit("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(ref dir) = opts.dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(if opts.shell.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        // Spawn and register under the table lock, so the orphan reaper
        // never sees an exited child that is not yet tracked.
        let (mut child, pid) = {
            let mut pids = self.pids.lock().await;
            let child = cmd.spawn()?;
            let pid = child.id();
            if let Some(pid) = pid {
                pids.insert(pid);
            }
            (child, pid)
        };
        debug!(program = %program, pid = ?pid, "Spawned process");

        if let Some(mut stdin) = child.stdin.take() {
            let script = opts.command.join("\n");
            tokio::spawn(async move {
                // the child may exit without reading its script
                let _ = stdin.write_all(script.as_bytes()).await;
            });
        }

        let stdout = child.stdout.take().map(|out| {
            let journal = Arc::clone(journal);
            tokio::spawn(async move { journal.stream_out(out).await })
        });
        let stderr = child.stderr.take().map(|err| {
            let journal = Arc::clone(journal);
            tokio::spawn(async move { journal.stream_err(err).await })
        });

        let status = child.wait().await;
        if let Some(pid) = pid {
            self.pids.lock().await.remove(&pid);
        }

        // Drain what the child wrote before exiting. A descendant that keeps
        // the pipes open must not hold the caller, so the drain is bounded.
        let drain = async {
            for handle in [stdout, stderr].into_iter().flatten() {
                let _ = handle.await;
            }
        };
        let _ = tokio::time::timeout(STREAM_DRAIN_TIMEOUT, drain).await;

        match status {
            Ok(status) if status.success() => journal.print("process exited"),
            Ok(status) => journal.error(format!("process exited: {}", status)),
            Err(e) => journal.error(format!("failed to wait for process: {}", e)),
        }
        debug!(pid = ?pid, "Process reaped");

        Ok(())
    }

    /// Send `sig` to every tracked child.
    ///
    /// Delivery failures are ignored; the child may have exited meanwhile.
    pub async fn signal_all(&self, sig: Signal) {
        let pids = self.pids.lock().await;
        for pid in pids.iter() {
            match signal::kill(Pid::from_raw(*pid as i32), sig) {
                Ok(()) => debug!(pid = pid, signal = ?sig, "Forwarded signal"),
                Err(e) => debug!(pid = pid, error = %e, "Failed to forward signal"),
            }
        }
    }

    /// Snapshot of all tracked pids.
    pub async fn pids(&self) -> Vec<u32> {
        self.pids.lock().await.iter().copied().collect()
    }

    /// Lock the table; used by the orphan reaper.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.pids.lock().await
    }
}

/// Build the argv for a child.
///
/// With a shell the argv is the lexed shell string and the command lines
/// become the child's stdin. Without one, every command item has its
/// environment variables expanded.
pub fn build_argv(opts: &ExecuteOptions) -> Result<Vec<String>> {
    let argv = match opts.shell {
        Some(ref shell) => shlex::split(shell)
            .ok_or_else(|| Error::ShellSplit(format!("invalid shell {:?}", shell)))?,
        None => opts.command.iter().map(|arg| expand_env(arg)).collect(),
    };

    if argv.is_empty() {
        return Err(Error::ShellSplit("empty command".to_string()));
    }
    Ok(argv)
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z0-9_]+)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("env pattern is valid")
    })
}

/// Replace `$VAR` and `${VAR}` with values from the process environment.
///
/// Unset variables expand to the empty string.
pub fn expand_env(s: &str) -> String {
    env_pattern()
        .replace_all(s, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}
