// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The uniform handle every launcher returns.
//!
//! Whatever runs the extension, the host sees three byte streams, a way to
//! send it signals, and an exit notification.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strum::Display;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use keel_core::{Emitter, KeelError, Subscription};

/// Signals used by the shutdown escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Signal {
    #[strum(serialize = "SIGTERM")]
    Term,
    #[strum(serialize = "SIGINT")]
    Int,
    #[strum(serialize = "SIGKILL")]
    Kill,
}

#[cfg(unix)]
impl Signal {
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal as Nix;
        match self {
            Signal::Term => Nix::SIGTERM,
            Signal::Int => Nix::SIGINT,
            Signal::Kill => Nix::SIGKILL,
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("exited"),
        }
    }
}

/// One-shot exit notification shared by a process and everyone watching it.
///
/// Can be awaited ([`ExitNotifier::wait`]) or observed through listeners
/// ([`ExitNotifier::on_exit`]). Only the first [`ExitNotifier::notify`] counts.
#[derive(Clone)]
pub struct ExitNotifier {
    state: Arc<watch::Sender<Option<ExitStatus>>>,
    listeners: Emitter<ExitStatus>,
}

impl Default for ExitNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitNotifier {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
            listeners: Emitter::new(),
        }
    }

    /// Records the exit and wakes every watcher. Returns false if the process
    /// had already exited.
    pub fn notify(&self, status: ExitStatus) -> bool {
        let first = self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(status);
            true
        });
        if first {
            self.listeners.emit(&status);
            self.listeners.dispose();
        }
        first
    }

    pub fn status(&self) -> Option<ExitStatus> {
        *self.state.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.status().is_some()
    }

    /// Resolves once the process has exited.
    pub async fn wait(&self) -> ExitStatus {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(Option::is_some).await.map(|status| *status);
        match result {
            Ok(Some(status)) => status,
            // The sender lives in `self`, so the channel cannot close first.
            _ => ExitStatus::default(),
        }
    }

    /// Runs `listener` exactly once when the process exits, immediately if it
    /// already has.
    pub fn on_exit(&self, listener: impl Fn(&ExitStatus) + Send + Sync + 'static) -> Subscription {
        let fired = Arc::new(AtomicBool::new(false));
        let listener = Arc::new(listener);

        let once = {
            let fired = Arc::clone(&fired);
            let listener = Arc::clone(&listener);
            move |status: &ExitStatus| {
                if !fired.swap(true, Ordering::SeqCst) {
                    listener(status);
                }
            }
        };
        let subscription = self.listeners.subscribe(once);

        // Covers an exit that happened before (or while) subscribing.
        if let Some(status) = self.status()
            && !fired.swap(true, Ordering::SeqCst)
        {
            subscription.dispose();
            listener(&status);
        }
        subscription
    }
}

impl fmt::Debug for ExitNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitNotifier")
            .field("status", &self.status())
            .finish()
    }
}

/// Delivers signals to a running unit of execution.
pub trait ProcessControl: Send + Sync {
    fn kill(&self, signal: Signal) -> Result<(), KeelError>;

    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;
}

pub type ProcessStdin = Box<dyn AsyncWrite + Send + Unpin>;
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Streams and controls of a launched extension.
pub struct ProcessHandle {
    pub stdin: ProcessStdin,
    pub stdout: ProcessOutput,
    pub stderr: ProcessOutput,
    pub control: Arc<dyn ProcessControl>,
    pub exit: ExitNotifier,
}

impl ProcessHandle {
    pub fn kill(&self, signal: Signal) -> Result<(), KeelError> {
        self.control.kill(signal)
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid())
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}
