//! Spawning and reaping of the launched control process.

use std::process::{Child, ExitStatus, Output, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use color_eyre::eyre::Context;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::command::ControlCommand;
use crate::error::{FixtureError, FixtureResult};
use crate::fs::open_append;
use crate::observability::LOG_TARGET;

/// Grace period between the polite and the forceful termination signal.
pub(super) const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runtime state of one launched server: the child process and the command
/// that started it.
#[derive(Debug, Default)]
pub(super) struct ServerHandle {
    child: Mutex<Option<Child>>,
    command_line: Option<String>,
}

impl ServerHandle {
    fn slot(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `command` with stdout and stderr appended to `log_file`.
    pub(super) fn launch(
        &mut self,
        command: &ControlCommand,
        rendered: String,
        log_file: &Utf8Path,
    ) -> FixtureResult<()> {
        let log = open_append(log_file)?;
        let log_err = log
            .try_clone()
            .with_context(|| format!("duplicate handle for {log_file}"))?;
        let mut std_command = command.to_command();
        std_command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        let child = std_command
            .spawn()
            .with_context(|| format!("failed to spawn {rendered}"))
            .map_err(FixtureError::from)?;
        debug!(target: LOG_TARGET, pid = child.id(), command = %rendered, "spawned pg_ctl");
        *self.slot() = Some(child);
        self.command_line = Some(rendered);
        Ok(())
    }

    pub(super) fn command_line(&self) -> Option<&str> {
        self.command_line.as_deref()
    }

    pub(super) fn has_child(&self) -> bool {
        self.slot().is_some()
    }

    /// Returns the exit status once the launched process has finished.
    pub(super) fn exit_status(&self) -> FixtureResult<Option<ExitStatus>> {
        let mut slot = self.slot();
        let Some(child) = slot.as_mut() else {
            return Ok(None);
        };
        child
            .try_wait()
            .context("failed to poll pg_ctl process")
            .map_err(FixtureError::from)
    }

    /// Reports whether the launched process is still alive.
    pub(super) fn child_alive(&self) -> bool {
        matches!(self.exit_status(), Ok(None)) && self.has_child()
    }

    /// Terminates and reaps the launched process, blocking the current
    /// thread for at most `grace` before escalating to a forced kill.
    pub(super) fn reap(&self, grace: Duration) {
        let Some(mut child) = self.slot().take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        terminate(&child);
        match child.wait_timeout(grace) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "failed waiting for pg_ctl to exit");
            }
        }
        force_kill(&mut child);
        if let Err(err) = child.wait() {
            warn!(target: LOG_TARGET, error = %err, "failed to reap pg_ctl after kill");
        }
    }

    /// Cooperative counterpart of [`ServerHandle::reap`]: polls the child
    /// between timer ticks and moves the final blocking wait off the runtime.
    pub(super) async fn reap_async(&self, grace: Duration) {
        let Some(mut child) = self.slot().take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        terminate(&child);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed polling pg_ctl");
                    break;
                }
            }
        }
        force_kill(&mut child);
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(target: LOG_TARGET, error = %err, "failed to reap pg_ctl after kill");
            }
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "reaper task failed");
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(err) => {
            debug!(target: LOG_TARGET, error = %err, ?signal, "process group signal failed");
            false
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &Child) {
    // Without process groups there is no polite signal; the bounded wait that
    // follows simply observes whether the process already finished.
    debug!(target: LOG_TARGET, pid = child.id(), "no process-group support; waiting before kill");
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if signal_group(child, nix::sys::signal::Signal::SIGKILL) {
            return;
        }
    }
    if let Err(err) = child.kill() {
        debug!(target: LOG_TARGET, error = %err, "kill failed; process already exited");
    }
}

/// Runs a short-lived control command to completion on the current thread.
pub(super) fn run_blocking(command: &ControlCommand, rendered: &str) -> FixtureResult<Output> {
    command
        .to_command()
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {rendered}"))
        .map_err(FixtureError::from)
}

/// Runs a short-lived control command to completion without blocking the
/// runtime.
pub(super) async fn run_async(command: &ControlCommand, rendered: &str) -> FixtureResult<Output> {
    let mut std_command = command.to_command();
    std_command.stdin(Stdio::null());
    tokio::process::Command::from(std_command)
        .output()
        .await
        .with_context(|| format!("failed to run {rendered}"))
        .map_err(FixtureError::from)
}

/// Fails with rendered output when `output` reports a non-zero exit.
pub(super) fn ensure_success(context: &str, output: &Output) -> FixtureResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(super::output::render_failure(context, output))
    }
}
