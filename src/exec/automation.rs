// src/exec/automation.rs

//! Interactive-automation backend.
//!
//! The engine's automation interface is stateful and fragile, so it is driven
//! from a separate host process. The host speaks a line protocol on
//! stdin/stdout; every request gets one reply line, `OK [detail]` or
//! `ERR <message>`:
//!
//! | request          | meaning                               |
//! |------------------|---------------------------------------|
//! | `INIT`           | initialise the automation subsystem   |
//! | `OPEN <project>` | open the workspace project            |
//! | `PLAN <title>`   | select the plan                       |
//! | `COMPUTE`        | start computing the current plan      |
//! | `CLOSE`          | close the project                     |
//! | `QUIT`           | quit the engine                       |
//! | `UNINIT`         | release the automation subsystem      |
//!
//! Teardown mirrors setup: whatever was acquired is released in reverse
//! order, on success, on error, and when the job is stopped.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::errors::{Result, SimbatchError};
use crate::job::JobSpec;
use crate::types::BackendKind;
use crate::workspace::Workspace;

use super::backend::{ExecutionBackend, hide_console, render_args};
use super::process::{ProcessHandle, SessionTeardown, drain_output, isolate_process_tree};

/// Default time allowed for one protocol reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(120);

/// One automation conversation with a host process.
pub struct AutomationSession {
    job_id: String,
    stdin: Option<ChildStdin>,
    replies: Lines<BufReader<ChildStdout>>,
    reply_timeout: Duration,
    initialized: bool,
    project_open: bool,
    engine_started: bool,
}

impl AutomationSession {
    pub fn new(
        job_id: impl Into<String>,
        stdin: ChildStdin,
        stdout: ChildStdout,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stdin: Some(stdin),
            replies: BufReader::new(stdout).lines(),
            reply_timeout,
            initialized: false,
            project_open: false,
            engine_started: false,
        }
    }

    /// Send one request and wait for its reply.
    async fn request(&mut self, line: &str) -> Result<String> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SimbatchError::Automation("session already closed".to_string()))?;
        debug!(job = %self.job_id, request = %line, "automation request");
        stdin.write_all(format!("{line}\n").as_bytes()).await?;
        stdin.flush().await?;

        let reply = tokio::time::timeout(self.reply_timeout, self.replies.next_line())
            .await
            .map_err(|_| {
                SimbatchError::Automation(format!(
                    "no reply to {line:?} within {:?}",
                    self.reply_timeout
                ))
            })??
            .ok_or_else(|| {
                SimbatchError::Automation(format!("host closed the session during {line:?}"))
            })?;

        let reply = reply.trim();
        if reply == "OK" {
            Ok(String::new())
        } else if let Some(detail) = reply.strip_prefix("OK ") {
            Ok(detail.to_string())
        } else if let Some(msg) = reply.strip_prefix("ERR") {
            Err(SimbatchError::Automation(format!(
                "{line:?} failed: {}",
                msg.trim()
            )))
        } else {
            Err(SimbatchError::Automation(format!(
                "unexpected reply to {line:?}: {reply:?}"
            )))
        }
    }

    /// Initialise, open the project, select the plan and start computing.
    pub async fn start(&mut self, project: &Path, plan: &str) -> Result<()> {
        self.request("INIT").await?;
        self.initialized = true;
        self.request(&format!("OPEN {}", project.display())).await?;
        self.project_open = true;
        self.engine_started = true;
        self.request(&format!("PLAN {plan}")).await?;
        self.request("COMPUTE").await?;
        info!(job = %self.job_id, plan, "automation compute started");
        Ok(())
    }

    /// Release everything acquired so far, in reverse order. Failures are
    /// logged; teardown always runs to the end.
    pub async fn shutdown(&mut self) {
        if self.stdin.is_none() {
            return;
        }
        if self.project_open {
            self.project_open = false;
            if let Err(e) = self.request("CLOSE").await {
                warn!(job = %self.job_id, error = %e, "automation CLOSE failed");
            }
        }
        if self.engine_started {
            self.engine_started = false;
            if let Err(e) = self.request("QUIT").await {
                warn!(job = %self.job_id, error = %e, "automation QUIT failed");
            }
        }
        if self.initialized {
            self.initialized = false;
            if let Err(e) = self.request("UNINIT").await {
                warn!(job = %self.job_id, error = %e, "automation UNINIT failed");
            }
        }
        // EOF tells the host to exit.
        self.stdin = None;
        debug!(job = %self.job_id, "automation session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.stdin.is_none()
    }
}

impl SessionTeardown for AutomationSession {
    fn release(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.shutdown())
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        if self.stdin.is_some() && self.initialized {
            // Dropping stdin gives the host EOF; the owning ProcessHandle
            // kills whatever is left of its tree.
            warn!(job = %self.job_id, "automation session dropped without teardown");
        }
    }
}

/// Backend that drives the engine through an automation host process.
#[derive(Debug, Clone)]
pub struct AutomationBackend {
    host: PathBuf,
    args: Vec<String>,
    reply_timeout: Duration,
}

impl AutomationBackend {
    pub fn new(host: impl Into<PathBuf>, args: Vec<String>, reply_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            args,
            reply_timeout,
        }
    }
}

impl ExecutionBackend for AutomationBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Automation
    }

    fn check_available(&self) -> Result<()> {
        if self.host.is_file() || which::which(&self.host).is_ok() {
            Ok(())
        } else {
            Err(SimbatchError::EngineUnavailable {
                backend: self.kind(),
                reason: format!("automation host {:?} not found", self.host),
            })
        }
    }

    fn launch<'a>(
        &'a self,
        workspace: &'a Workspace,
        job: &'a JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>> {
        Box::pin(async move {
            let launch_err = |reason: String| SimbatchError::Launch {
                job: job.id().to_string(),
                reason,
            };

            let args = render_args(&self.args, workspace, job);
            info!(job = %job.id(), host = ?self.host, ?args, "starting automation host");

            let mut cmd = Command::new(&self.host);
            cmd.args(&args)
                .current_dir(workspace.root())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            isolate_process_tree(&mut cmd);
            if job.options().hide_window {
                hide_console(&mut cmd);
            }

            let mut child = cmd
                .spawn()
                .map_err(|e| launch_err(format!("spawning {:?}: {e}", self.host)))?;
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            if let Some(err) = child.stderr.take() {
                drain_output(job.id(), "stderr", err);
            }

            // From here on, dropping `handle` kills the host tree.
            let mut handle = ProcessHandle::new(job.id(), child);
            let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
                let _ = handle.kill_tree().await;
                return Err(launch_err("automation host pipes unavailable".to_string()));
            };

            let mut session = AutomationSession::new(job.id(), stdin, stdout, self.reply_timeout);
            match session.start(workspace.project_file(), job.plan()).await {
                Ok(()) => Ok(handle.with_session(Box::new(session))),
                Err(e) => {
                    session.shutdown().await;
                    if let Err(kill) = handle.kill_tree().await {
                        warn!(job = %job.id(), error = %kill, "failed to stop automation host");
                    }
                    Err(launch_err(e.to_string()))
                }
            }
        })
    }

    fn describe_exit(&self, code: Option<i32>) -> String {
        match code {
            Some(c) => format!("automation host exited with code {c}"),
            None => "automation host was terminated by a signal".to_string(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workspace::{WorkspaceManager, WorkspaceSettings};

    /// Host that records every request to `requests.log` and fails the
    /// request named in `$1`, if any.
    const FAKE_HOST: &str = r#"
fail="$1"
while IFS= read -r line; do
  echo "$line" >> requests.log
  cmd="${line%% *}"
  if [ "$cmd" = "$fail" ]; then echo "ERR $cmd refused"; continue; fi
  case "$cmd" in
    COMPUTE) printf 'Finished Successfully' > model.p01.hdf; echo OK ;;
    UNINIT) echo OK; exit 0 ;;
    *) echo OK ;;
  esac
done
"#;

    fn staged(root: &Path, project: &Path) -> (Workspace, JobSpec) {
        std::fs::write(project.join("model.prj"), "Proj Title=x\n").unwrap();
        std::fs::write(project.join("model.p01"), "Plan Title=p\n").unwrap();
        let manager = WorkspaceManager::new(&WorkspaceSettings {
            root: Some(root.to_path_buf()),
            ..WorkspaceSettings::default()
        })
        .unwrap();
        let job = JobSpec::new("01", "plan01", project.join("model.prj"), "model.p01");
        let ws = manager.create(&job).unwrap();
        (ws, job)
    }

    fn backend(fail: &str) -> AutomationBackend {
        AutomationBackend::new(
            "sh",
            vec!["-c".to_string(), FAKE_HOST.to_string(), "host".to_string(), fail.to_string()],
            Duration::from_secs(5),
        )
    }

    fn requests(ws: &Workspace) -> Vec<String> {
        std::fs::read_to_string(ws.root().join("requests.log"))
            .unwrap()
            .lines()
            .map(|l| l.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn full_session_tears_down_symmetrically() {
        let root = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let (ws, job) = staged(root.path(), project.path());

        let mut handle = backend("").launch(&ws, &job).await.unwrap();
        assert!(ws.root().join("model.p01.hdf").exists());

        handle.release().await;
        let status = handle.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.and_then(|s| s.code()), Some(0));
        assert_eq!(
            requests(&ws),
            vec!["INIT", "OPEN", "PLAN", "COMPUTE", "CLOSE", "QUIT", "UNINIT"]
        );
    }

    #[tokio::test]
    async fn failed_plan_selection_releases_what_was_acquired() {
        let root = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let (ws, job) = staged(root.path(), project.path());

        let err = backend("PLAN").launch(&ws, &job).await.unwrap_err();
        assert!(matches!(err, SimbatchError::Launch { .. }));
        assert_eq!(
            requests(&ws),
            vec!["INIT", "OPEN", "PLAN", "CLOSE", "QUIT", "UNINIT"]
        );
    }

    #[tokio::test]
    async fn failed_init_releases_nothing_else() {
        let root = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let (ws, job) = staged(root.path(), project.path());

        let err = backend("INIT").launch(&ws, &job).await.unwrap_err();
        assert!(err.to_string().contains("INIT"));
        assert_eq!(requests(&ws), vec!["INIT"]);
    }
}
