// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launches native executables with piped stdio.
//!
//! Each child is owned by a supervisor task that reaps it, delivers signals
//! on request, and fires the exit notification.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use keel_core::KeelError;

use crate::launcher::{LaunchParams, Launcher};
use crate::process::{ExitNotifier, ExitStatus, ProcessControl, ProcessHandle, Signal};

/// Runs the executable at `path` with its directory as working directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLauncher;

impl NativeLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for NativeLauncher {
    async fn launch(
        &self,
        path: &Path,
        args: &[String],
        params: LaunchParams,
    ) -> Result<ProcessHandle, KeelError> {
        let mut command = Command::new(path);
        command.args(args);
        if let Some(dir) = working_dir(path) {
            command.current_dir(dir);
        }
        spawn_supervised(command, path, &params)
    }
}

pub(crate) fn working_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// Spawns `command` with piped stdio and hands the child to a supervisor.
pub(crate) fn spawn_supervised(
    mut command: Command,
    path: &Path,
    params: &LaunchParams,
) -> Result<ProcessHandle, KeelError> {
    let shown = path.display().to_string();
    if params.is_cancelled() {
        return Err(KeelError::Cancelled(format!("launch of `{shown}` aborted")));
    }

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| KeelError::Launch {
        path: shown.clone(),
        message: e.to_string(),
        source: Some(Arc::new(e)),
    })?;

    let missing = |stream: &str| KeelError::Launch {
        path: shown.clone(),
        message: format!("{stream} was not captured"),
        source: None,
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let pid = child.id();
    debug!(path = %shown, pid = ?pid, "spawned extension process");

    let exit = ExitNotifier::new();
    let (signals, signal_rx) = mpsc::unbounded_channel();
    let cancel = params.cancel.clone().unwrap_or_default();
    tokio::spawn(supervise(child, signal_rx, exit.clone(), cancel, shown));

    Ok(ProcessHandle {
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
        stderr: Box::new(stderr),
        control: Arc::new(ChildControl { pid, signals }),
        exit,
    })
}

struct ChildControl {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl ProcessControl for ChildControl {
    fn kill(&self, signal: Signal) -> Result<(), KeelError> {
        self.signals
            .send(signal)
            .map_err(|_| KeelError::InvalidRequest("process has already exited".to_string()))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

async fn supervise(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    exit: ExitNotifier,
    cancel: CancellationToken,
    path: String,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = signals.recv() => match signal {
                Some(signal) => deliver(&mut child, signal, &path),
                // Every handle is gone; nobody can stop the child any more.
                None => {
                    let _ = child.start_kill();
                    break child.wait().await;
                }
            },
            () = cancel.cancelled() => {
                debug!(path = %path, "launch cancelled, killing child");
                let _ = child.start_kill();
                break child.wait().await;
            }
        }
    };

    let status = match status {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            warn!(path = %path, error = %e, "failed to wait for extension process");
            ExitStatus::default()
        }
    };
    debug!(path = %path, status = %status, "extension process exited");
    exit.notify(status);
}

#[cfg(unix)]
fn deliver(child: &mut Child, signal: Signal, path: &str) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Not reaped yet, so the pid still names our child.
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(errno) = kill(Pid::from_raw(pid), signal.to_nix()) {
        warn!(
            path = %path,
            signal = %signal,
            error = %errno,
            "failed to signal extension process"
        );
    }
}

#[cfg(not(unix))]
fn deliver(child: &mut Child, signal: Signal, path: &str) {
    debug!(path = %path, signal = %signal, "no signals on this platform, terminating");
    if let Err(e) = child.start_kill() {
        warn!(path = %path, error = %e, "failed to terminate extension process");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sh() -> &'static Path {
        Path::new("/bin/sh")
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_string(), body.to_string()]
    }

    #[tokio::test]
    async fn echoes_through_pipes() {
        let mut handle = NativeLauncher
            .launch(sh(), &script("cat"), LaunchParams::default())
            .await
            .unwrap();
        assert!(handle.pid().is_some());

        handle.stdin.write_all(b"ping").await.unwrap();
        drop(handle.stdin);

        let mut out = String::new();
        handle.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "ping");
        assert!(handle.exit.wait().await.success());
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let handle = NativeLauncher
            .launch(sh(), &script("exit 3"), LaunchParams::default())
            .await
            .unwrap();
        assert_eq!(handle.exit.wait().await.code, Some(3));
    }

    #[tokio::test]
    async fn runs_in_the_executable_directory() {
        let mut handle = NativeLauncher
            .launch(sh(), &script("pwd"), LaunchParams::default())
            .await
            .unwrap();
        let mut out = String::new();
        handle.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(
            std::fs::canonicalize(out.trim_end()).unwrap(),
            std::fs::canonicalize("/bin").unwrap()
        );
    }

    #[tokio::test]
    async fn kill_delivers_signal() {
        let handle = NativeLauncher
            .launch(sh(), &script("sleep 30"), LaunchParams::default())
            .await
            .unwrap();
        handle.kill(Signal::Kill).unwrap();
        let status = handle.exit.wait().await;
        assert_eq!(status.signal, Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_launch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = NativeLauncher
            .launch(
                sh(),
                &script("exit 0"),
                LaunchParams {
                    cancel: Some(cancel),
                    ..LaunchParams::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::Cancelled(_)));
    }

    #[tokio::test]
    async fn cancelling_later_kills_the_child() {
        let cancel = CancellationToken::new();
        let handle = NativeLauncher
            .launch(
                sh(),
                &script("sleep 30"),
                LaunchParams {
                    cancel: Some(cancel.clone()),
                    ..LaunchParams::default()
                },
            )
            .await
            .unwrap();
        cancel.cancel();
        assert!(!handle.exit.wait().await.success());
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let err = NativeLauncher
            .launch(
                Path::new("/nonexistent/keel-extension"),
                &[],
                LaunchParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::Launch { .. }));
    }
}
