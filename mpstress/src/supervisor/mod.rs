//! Helper process supervision
//!
//! Starts the remote execution helper (orgalorg) so that it runs `mpstat`
//! on every host and relays its output as JSON lines:
//! - host list written to stdin, then stdin closed
//! - stdout piped to the stream decoder
//! - stderr inherited from this process
//! - signals delivered by pid, never to an already reaped process

use crate::config::HelperConfig;
use crate::error::{CollectorError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Everything needed to start one helper run
#[derive(Debug, Clone)]
pub struct HelperLaunch {
    pub helper: HelperConfig,
    pub user: String,
    pub interval: u32,
}

impl HelperLaunch {
    /// Helper arguments: unattended, json output, remote command with interval
    pub fn args(&self) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-u".to_string(),
            self.user.clone(),
            "-x".to_string(),
            "-s".to_string(),
            "--json".to_string(),
            "-C".to_string(),
            "--".to_string(),
            self.helper.remote_command.clone(),
            self.interval.to_string(),
        ]
    }

    /// Start the helper and hand it the host list
    pub async fn spawn(&self, hosts: &[String]) -> Result<HelperProcess> {
        let mut child = Command::new(&self.helper.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollectorError::Spawn {
                program: self.helper.program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or(CollectorError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(CollectorError::MissingPipe("stdout"))?;
        let pid = child
            .id()
            .ok_or_else(|| CollectorError::ExitedEarly(self.helper.program.clone()))?;

        let mut list = hosts.join("\n");
        list.push('\n');
        stdin
            .write_all(list.as_bytes())
            .await
            .map_err(CollectorError::HostList)?;
        stdin.shutdown().await.map_err(CollectorError::HostList)?;
        drop(stdin);

        info!(
            "started {} (pid {}) on {} hosts",
            self.helper.program,
            pid,
            hosts.len()
        );

        let reaped = Arc::new(AtomicBool::new(false));
        Ok(HelperProcess {
            child,
            stdout,
            signal: HelperSignal {
                pid,
                reaped: reaped.clone(),
            },
            reaped,
        })
    }
}

/// A started helper, split into its output stream, a signal handle and a waiter
pub struct HelperProcess {
    child: Child,
    stdout: ChildStdout,
    signal: HelperSignal,
    reaped: Arc<AtomicBool>,
}

impl HelperProcess {
    pub fn pid(&self) -> u32 {
        self.signal.pid
    }

    pub fn into_parts(self) -> (ChildStdout, HelperSignal, HelperWaiter) {
        let waiter = HelperWaiter {
            child: self.child,
            reaped: self.reaped,
        };
        (self.stdout, self.signal, waiter)
    }
}

/// Sends signals to the helper by pid
#[derive(Debug, Clone)]
pub struct HelperSignal {
    pid: u32,
    reaped: Arc<AtomicBool>,
}

impl HelperSignal {
    /// Ask the helper to stop; it closes its stdout on the way out
    pub fn interrupt(&self) -> bool {
        self.send(Signal::SIGINT)
    }

    /// Kill the helper outright
    pub fn kill(&self) -> bool {
        self.send(Signal::SIGKILL)
    }

    pub fn has_exited(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }

    fn send(&self, sig: Signal) -> bool {
        if self.has_exited() {
            debug!("helper {} already exited, not sending {}", self.pid, sig);
            return false;
        }
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) => {
                debug!("sent {} to helper {}", sig, self.pid);
                true
            }
            Err(e) => {
                warn!("failed to send {} to helper {}: {}", sig, self.pid, e);
                false
            }
        }
    }
}

/// Owns the child until it exits
pub struct HelperWaiter {
    child: Child,
    reaped: Arc<AtomicBool>,
}

impl HelperWaiter {
    /// Block until the helper exits. Wait errors are returned, not raised.
    pub async fn wait(mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await;
        self.reaped.store(true, Ordering::SeqCst);
        status
    }
}
