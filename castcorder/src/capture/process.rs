//! Lifecycle of one external capture process.
//!
//! [`ManagedProcess`] is the only thing allowed to signal or kill the child.
//! Everything else asks for termination through the supervisor, which holds
//! the single `&mut` to it.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    /// A stop has been requested and the process has not been reaped yet.
    Terminating,
    Exited(ExitStatus),
}

pub struct ManagedProcess {
    name: String,
    command: Option<Command>,
    child: Option<Child>,
    pid: Option<u32>,
    state: ProcessState,
}

impl ManagedProcess {
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            command: Some(command),
            child: None,
            pid: None,
            state: ProcessState::NotStarted,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process may still be alive.
    pub fn is_alive(&self) -> bool {
        matches!(self.state, ProcessState::Running | ProcessState::Terminating)
    }

    /// Start the process and hand back its output pipes.
    pub fn spawn(&mut self) -> Result<(Option<ChildStdout>, Option<ChildStderr>)> {
        let mut command = self
            .command
            .take()
            .ok_or_else(|| Error::process(format!("{} was already started", self.name)))?;

        let mut child = command
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn {}: {e}", self.name)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.pid = child.id();
        self.child = Some(child);
        self.state = ProcessState::Running;
        debug!(process = %self.name, pid = ?self.pid, "Process started");
        Ok((stdout, stderr))
    }

    /// Wait for the process to exit on its own. Cancel safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        if let ProcessState::Exited(status) = self.state {
            return Ok(status);
        }
        let Some(child) = self.child.as_mut() else {
            return Err(std::io::Error::other(format!("{} is not running", self.name)));
        };
        let status = child.wait().await?;
        self.state = ProcessState::Exited(status);
        Ok(status)
    }

    /// Two-phase stop: interrupt, wait up to `grace`, then kill.
    ///
    /// Cancelling `escalate` during the grace period skips straight to the
    /// kill. Returns the exit status if the process was reaped.
    pub async fn terminate(
        &mut self,
        grace: Duration,
        force_bound: Duration,
        escalate: &CancellationToken,
    ) -> Option<ExitStatus> {
        if !self.is_alive() {
            return self.exit_status();
        }
        self.state = ProcessState::Terminating;

        if process_utils::supports_interrupt()
            && !escalate.is_cancelled()
            && let Some(pid) = self.pid
        {
            match process_utils::interrupt_group(pid) {
                Ok(()) => {
                    debug!(process = %self.name, pid, "Sent interrupt, waiting for exit");
                    if let Some(child) = self.child.as_mut() {
                        tokio::select! {
                            status = child.wait() => match status {
                                Ok(status) => {
                                    self.state = ProcessState::Exited(status);
                                    return Some(status);
                                }
                                Err(e) => warn!(process = %self.name, "Wait after interrupt failed: {}", e),
                            },
                            _ = tokio::time::sleep(grace) => {
                                warn!(
                                    process = %self.name,
                                    "Did not exit within {:?} of the interrupt, killing",
                                    grace
                                );
                            }
                            _ = escalate.cancelled() => {
                                debug!(process = %self.name, "Stop escalated during grace period");
                            }
                        }
                    }
                }
                Err(e) => warn!(process = %self.name, "Failed to interrupt: {}", e),
            }
        }

        self.kill(force_bound).await
    }

    /// Kill immediately and wait at most `bound` for the process to be reaped.
    pub async fn kill(&mut self, bound: Duration) -> Option<ExitStatus> {
        if !self.is_alive() {
            return self.exit_status();
        }
        self.state = ProcessState::Terminating;

        if let Some(pid) = self.pid
            && let Err(e) = process_utils::kill_group(pid)
            && e.kind() != std::io::ErrorKind::Unsupported
        {
            debug!(process = %self.name, "Process group kill failed: {}", e);
        }

        let child = self.child.as_mut()?;
        if let Err(e) = child.start_kill() {
            debug!(process = %self.name, "Kill failed: {}", e);
        }

        match tokio::time::timeout(bound, child.wait()).await {
            Ok(Ok(status)) => {
                self.state = ProcessState::Exited(status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(process = %self.name, "Wait after kill failed: {}", e);
                None
            }
            Err(_) => {
                warn!(process = %self.name, "Process not reaped within {:?} of kill", bound);
                None
            }
        }
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        match self.state {
            ProcessState::Exited(status) => Some(status),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::time::Instant;

    fn sh(script: &str) -> ManagedProcess {
        let mut cmd = process_utils::supervised_command("sh");
        cmd.arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        ManagedProcess::new("sh", cmd)
    }

    #[tokio::test]
    async fn natural_exit_is_recorded() {
        let mut p = sh("exit 3");
        assert_eq!(p.state(), ProcessState::NotStarted);
        p.spawn().unwrap();
        let status = p.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(!p.is_alive());
    }

    #[tokio::test]
    async fn cannot_spawn_twice() {
        let mut p = sh("exit 0");
        p.spawn().unwrap();
        assert!(p.spawn().is_err());
        p.wait().await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_is_honoured_within_grace() {
        let mut p = sh("trap 'exit 0' INT; while :; do sleep 0.1; done");
        p.spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = p
            .terminate(
                Duration::from_secs(5),
                Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(status.code(), Some(0));
    }

    #[tokio::test]
    async fn ignored_interrupt_escalates_to_kill() {
        let mut p = sh("trap '' INT; while :; do sleep 0.1; done");
        p.spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let status = p
            .terminate(
                Duration::from_millis(300),
                Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(status.signal(), Some(nix::libc::SIGKILL));
        assert!(started.elapsed() < Duration::from_millis(300) + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn escalated_token_skips_grace() {
        let mut p = sh("trap '' INT; while :; do sleep 0.1; done");
        p.spawn().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let started = Instant::now();
        p.terminate(Duration::from_secs(30), Duration::from_secs(2), &token)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn terminate_before_spawn_is_noop() {
        let mut p = sh("exit 0");
        let status = p
            .terminate(
                Duration::from_secs(1),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(status.is_none());
        assert_eq!(p.state(), ProcessState::NotStarted);
    }
}
