// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launches an extension in a child copy of the host runtime.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use keel_core::KeelError;

use crate::launcher::{LaunchParams, Launcher};
use crate::native::{spawn_supervised, working_dir};
use crate::process::ProcessHandle;

/// Runs `<program> <leading args...> <path> <args...>`, e.g. a script
/// interpreter handed the extension's entry point.
#[derive(Debug, Clone)]
pub struct ChildRuntimeLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl ChildRuntimeLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Launcher for ChildRuntimeLauncher {
    async fn launch(
        &self,
        path: &Path,
        args: &[String],
        params: LaunchParams,
    ) -> Result<ProcessHandle, KeelError> {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args).arg(path).args(args);
        if let Some(dir) = working_dir(path) {
            command.current_dir(dir);
        }
        spawn_supervised(command, path, &params)
    }
}
