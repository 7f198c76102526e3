// src/exec/process.rs

//! Handle to one job's engine process group.
//!
//! The engine spawns preprocessing and solver helpers, so termination always
//! targets the whole tree:
//! - Unix: the engine is started as the leader of a new process group and
//!   the group gets `SIGKILL`.
//! - Windows: `taskkill /F /T` on the engine's PID.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Teardown for a stateful engine session running inside the process.
///
/// Called once the job is judged complete, before the process is reaped.
pub trait SessionTeardown: Send {
    fn release(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Put the command in its own process group so the tree can be killed as
/// one unit, and make sure dropping the handle never leaks the engine.
pub fn isolate_process_tree(cmd: &mut Command) {
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
}

/// Forcefully terminate `pid` and all of its descendants.
///
/// A tree that is already gone counts as success.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Forcefully terminate `pid` and all of its descendants.
///
/// A tree that is already gone counts as success.
#[cfg(windows)]
pub fn kill_process_tree(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    // 128: no such process
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}

#[cfg(not(any(unix, windows)))]
pub fn kill_process_tree(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process tree termination is not supported on this platform",
    ))
}

/// Forward a child output stream to debug logs so its pipe never fills.
pub fn drain_output<R>(job: &str, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let job = job.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job = %job, stream, "engine: {}", line);
        }
    });
}

/// The supervised engine process for one job.
pub struct ProcessHandle {
    job_id: String,
    child: Child,
    pid: Option<u32>,
    started: Instant,
    launched_at: DateTime<Utc>,
    exit: Option<ExitStatus>,
    session: Option<Box<dyn SessionTeardown>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("job_id", &self.job_id)
            .field("pid", &self.pid)
            .field("launched_at", &self.launched_at)
            .field("exit", &self.exit)
            .field("has_session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wrap an already spawned child. The child must have been configured
    /// with [`isolate_process_tree`].
    pub fn new(job_id: impl Into<String>, child: Child) -> Self {
        let pid = child.id();
        Self {
            job_id: job_id.into(),
            child,
            pid,
            started: Instant::now(),
            launched_at: Utc::now(),
            exit: None,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Box<dyn SessionTeardown>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Exit status, once reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Non-blocking liveness check.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.exit = status;
        }
        Ok(status)
    }

    /// Wait up to `grace` for the process to exit on its own.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> io::Result<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.exit = Some(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Run the session teardown, if there is one. Idempotent.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release().await;
        }
    }

    /// Kill the whole process tree and reap the primary process.
    pub async fn kill_tree(&mut self) -> io::Result<()> {
        if let Some(pid) = self.pid {
            if let Err(e) = kill_process_tree(pid) {
                warn!(job = %self.job_id, pid, error = %e, "process tree kill failed; killing primary only");
            }
        }
        // Also covers platforms without tree kill; a no-op once exited.
        if self.exit.is_none() {
            if let Err(e) = self.child.kill().await {
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
            }
            self.exit = self.child.try_wait()?;
        }
        self.session = None;
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Some(pid) = self.pid {
            warn!(job = %self.job_id, pid, "engine process dropped while running; killing tree");
            let _ = kill_process_tree(pid);
        }
    }
}
