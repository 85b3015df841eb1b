//! Orphan reaping for PID 1.
//!
//! Processes orphaned anywhere in the container are re-parented to PID 1 and
//! stay zombies until it waits for them. The reaper collects those, and only
//! those: children tracked by the [`ProcessSupervisor`] are left for the
//! execution primitive, which owns their exit status.

use crate::process::ProcessSupervisor;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reap pass interval, in case a SIGCHLD was coalesced.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Reap orphans on every SIGCHLD and once per [`REAP_INTERVAL`] until
/// `token` is cancelled.
pub async fn run(supervisor: Arc<ProcessSupervisor>, token: CancellationToken) -> io::Result<()> {
    let mut sigchld = signal(SignalKind::child())?;
    let mut interval = tokio::time::interval(REAP_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sigchld.recv() => {}
            _ = interval.tick() => {}
        }
        reap_orphans(&supervisor).await;
    }

    Ok(())
}

/// Reap every exited child that is not tracked by `supervisor`.
///
/// Stops at the first exited child that is tracked; it will be waited for
/// by its owner and the next pass continues from there. Returns the number
/// of reaped processes.
pub async fn reap_orphans(supervisor: &ProcessSupervisor) -> usize {
    // hold the table so no child can be spawned and exit untracked meanwhile
    let tracked = supervisor.lock().await;
    let mut reaped = 0;

    while let Some(pid) = peek_exited() {
        if tracked.contains(&(pid as u32)) {
            break;
        }
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                debug!(pid = pid, status = ?status, "Reaped orphan");
                reaped += 1;
            }
            Err(e) => {
                warn!(pid = pid, error = %e, "Failed to reap orphan");
                break;
            }
        }
    }

    reaped
}

/// Pid of an exited child, leaving it waitable.
fn peek_exited() -> Option<i32> {
    // SAFETY: siginfo_t is plain data and waitid only writes into it.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::waitid(
            libc::P_ALL,
            0,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if ret != 0 {
        return None;
    }

    // si_pid stays zero when no child has exited
    let pid = unsafe { info.si_pid() };
    (pid > 0).then_some(pid)
}
