//! External transcoder process supervision.
//!
//! Spawns one transcoder process per buffering or ABR task and exposes its
//! lifecycle. Termination is two-phase: a cooperative interrupt first, so
//! the transcoder can flush the trailing segment and manifest, then a hard
//! kill once the grace period elapses. Callers of stop must tolerate the
//! last segment being truncated after a hard kill.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Exit details observed for a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// True when the process exited without terminate() having been called.
    pub unexpected: bool,
}

/// Handle to a spawned transcoder process.
///
/// Owned exclusively by its session; all methods take `&mut self`, so the
/// session's per-entry lock serializes every lifecycle interaction.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    termination_requested: bool,
    exit: Option<ExitInfo>,
}

impl ProcessHandle {
    /// OS process id, if the process spawned successfully.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check.
    ///
    /// Returns `Some` once the process has exited; the result is cached so
    /// repeated polls after exit are cheap and stable.
    pub fn poll_exit(&mut self) -> Result<Option<ExitInfo>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        match self.child.try_wait()? {
            Some(status) => {
                let info = ExitInfo {
                    code: status.code(),
                    unexpected: !self.termination_requested,
                };
                self.exit = Some(info);
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.poll_exit(), Ok(None))
    }

    /// Two-phase termination: cooperative signal, then a hard kill after
    /// `grace`. Returns the exit code when one is available.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>> {
        self.termination_requested = true;

        if let Some(exit) = self.poll_exit()? {
            return Ok(exit.code);
        }

        self.request_graceful()?;
        debug!(pid = ?self.pid, "Requested graceful shutdown");

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(pid = ?self.pid, grace_secs = grace.as_secs(), "Grace period expired, killing process");
                self.child.kill().await?;
                self.child.wait().await?
            }
        };

        let info = ExitInfo {
            code: status.code(),
            unexpected: false,
        };
        self.exit = Some(info);
        info!(pid = ?self.pid, code = ?info.code, "Transcoder terminated");
        Ok(info.code)
    }

    #[cfg(unix)]
    fn request_graceful(&mut self) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_graceful(&mut self) -> std::io::Result<()> {
        // No cooperative signal available; fall through to the kill path.
        self.child.start_kill()
    }
}

/// Spawns transcoder processes for the session managers.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    binary: String,
}

impl ProcessSupervisor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Spawn the transcoder with `args`, running inside `workdir`.
    ///
    /// Fails fast if the binary cannot be started; there is no retry. The
    /// child is killed on drop so a leaked handle cannot outlive the
    /// service.
    pub fn spawn(&self, args: &[String], workdir: &Path) -> Result<ProcessHandle> {
        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let pid = child.id();
        info!(binary = %self.binary, pid = ?pid, workdir = ?workdir, "Spawned transcoder");

        Ok(ProcessHandle {
            child,
            pid,
            termination_requested: false,
            exit: None,
        })
    }
}
