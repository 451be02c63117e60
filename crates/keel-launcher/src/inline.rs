// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs extensions inside the host process over in-memory pipes.
//!
//! Modules are registered under the path an extension manifest would name.
//! Launching one wires three `tokio::io::duplex` pipes in place of OS stdio.
//! Killing it asks the module to deactivate instead of sending a signal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::DuplexStream;
use tracing::debug;

use keel_core::KeelError;

use crate::launcher::{LaunchParams, Launcher};
use crate::process::{ExitNotifier, ExitStatus, ProcessControl, ProcessHandle, Signal};

/// The module's ends of its three pipes, plus its exit notifier.
pub struct InlineIo {
    /// Bytes the host writes to the module.
    pub stdin: DuplexStream,
    /// Bytes the module writes to the host.
    pub stdout: DuplexStream,
    /// Diagnostics the module writes to the host.
    pub stderr: DuplexStream,
    /// Fire this when the module stops.
    pub exit: ExitNotifier,
}

/// A module that can run as an inline extension.
#[async_trait]
pub trait InlineModule: Send + Sync + 'static {
    async fn activate(
        &self,
        io: InlineIo,
        args: Vec<String>,
        requirements: Value,
    ) -> Result<(), KeelError>;

    /// Called for every kill request; the module should stop and notify exit.
    fn deactivate(&self);
}

pub struct InlineLauncher {
    modules: RwLock<HashMap<String, Arc<dyn InlineModule>>>,
    buffer_size: usize,
}

impl InlineLauncher {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            buffer_size,
        }
    }

    /// Makes `module` launchable under `path`.
    pub fn register(&self, path: impl Into<String>, module: Arc<dyn InlineModule>) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), module);
    }

    pub fn unregister(&self, path: &str) -> bool {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }

    fn module(&self, path: &str) -> Option<Arc<dyn InlineModule>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl Launcher for InlineLauncher {
    async fn launch(
        &self,
        path: &Path,
        args: &[String],
        params: LaunchParams,
    ) -> Result<ProcessHandle, KeelError> {
        let key = path.to_string_lossy();
        let module = self.module(&key).ok_or_else(|| KeelError::Launch {
            path: key.to_string(),
            message: "no inline module is registered under this path".to_string(),
            source: None,
        })?;
        if params.is_cancelled() {
            return Err(KeelError::Cancelled(format!("launch of `{key}` aborted")));
        }

        let (host_stdin, module_stdin) = tokio::io::duplex(self.buffer_size);
        let (host_stdout, module_stdout) = tokio::io::duplex(self.buffer_size);
        let (host_stderr, module_stderr) = tokio::io::duplex(self.buffer_size);
        let exit = ExitNotifier::new();

        module
            .activate(
                InlineIo {
                    stdin: module_stdin,
                    stdout: module_stdout,
                    stderr: module_stderr,
                    exit: exit.clone(),
                },
                args.to_vec(),
                params.requirements,
            )
            .await?;
        debug!(module = %key, "inline module activated");

        Ok(ProcessHandle {
            stdin: Box::new(host_stdin),
            stdout: Box::new(host_stdout),
            stderr: Box::new(host_stderr),
            control: Arc::new(InlineControl {
                module,
                exit: exit.clone(),
            }),
            exit,
        })
    }
}

struct InlineControl {
    module: Arc<dyn InlineModule>,
    exit: ExitNotifier,
}

impl ProcessControl for InlineControl {
    fn kill(&self, signal: Signal) -> Result<(), KeelError> {
        if self.exit.has_exited() {
            return Ok(());
        }
        self.module.deactivate();
        // A forced kill always ends the module, cooperative or not.
        if signal == Signal::Kill {
            self.exit.notify(ExitStatus::default());
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}
