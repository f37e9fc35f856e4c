//! Managed child process — spawning and terminating workflow server children.
//!
//! Children run `<interpreter> -m <framework> dev <entry> --port <port>` with
//! `WORKFLOW_MODULE` overridden and everything else inherited from the parent
//! environment. stdout/stderr stay attached to the parent console so server
//! logs are visible live; the trade-off is that the supervisor does not
//! capture them.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command as TokioCommand};

use crate::config::LauncherSettings;
use crate::registry::WorkflowConfig;

use super::error::SupervisorError;

/// Environment variable telling the child which workflow module to load.
pub const WORKFLOW_MODULE_ENV: &str = "WORKFLOW_MODULE";

/// Argument vector for a workflow server launch.
fn launch_args(launcher: &LauncherSettings, port: u16) -> Vec<String> {
    vec![
        "-m".to_string(),
        launcher.framework.clone(),
        "dev".to_string(),
        launcher.entry.clone(),
        "--port".to_string(),
        port.to_string(),
    ]
}

/// A workflow server process owned by the supervisor.
pub struct ManagedChild {
    child: Child,
    pid: u32,
}

impl ManagedChild {
    pub fn spawn(
        launcher: &LauncherSettings,
        config: &WorkflowConfig,
    ) -> Result<Self, SupervisorError> {
        let mut cmd = TokioCommand::new(&launcher.interpreter);
        cmd.args(launch_args(launcher, config.port))
            .env(WORKFLOW_MODULE_ENV, &config.module)
            .stdin(Stdio::null())
            // Server logs appear on the parent console, not in a pipe
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // Children must not outlive an abnormally exiting parent
            .kill_on_drop(true);

        if let Some(dir) = &launcher.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            module: config.module.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get PID of spawned process"))?;

        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process is still alive (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Graceful stop: request termination, wait up to `grace`, then escalate
    /// to a forceful kill. Returns `true` if the process confirmed exit
    /// within the grace period.
    pub async fn stop(mut self, grace: Duration) -> bool {
        if let Err(e) = send_terminate(self.pid) {
            // 이미 죽은 프로세스일 수 있음 — 아래 wait가 곧바로 반환된다
            tracing::debug!("Terminate request for PID {} failed: {}", self.pid, e);
        }

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        match waited {
            Ok(_) => true,
            Err(_) => {
                self.force_kill().await;
                false
            }
        }
    }

    /// Kill immediately and reap the zombie.
    pub async fn force_kill(mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to kill PID {}: {}", self.pid, e);
        }
        let _ = self.child.wait().await;
    }
}

/// Request graceful termination without waiting. 크로스 플랫폼.
#[cfg(unix)]
fn send_terminate(pid: u32) -> anyhow::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| anyhow::anyhow!("Failed to send SIGTERM to PID {}: {}", pid, e))
}

/// Windows has no TERM equivalent; TerminateProcess is the close.
#[cfg(windows)]
fn send_terminate(pid: u32) -> anyhow::Result<()> {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            anyhow::bail!("Failed to open process {}", pid);
        }

        let result = TerminateProcess(handle, 0);
        CloseHandle(handle);

        if result == 0 {
            anyhow::bail!("TerminateProcess failed for PID {}", pid);
        }
    }
    Ok(())
}
