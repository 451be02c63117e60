// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The launcher strategy trait.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use keel_core::KeelError;

use crate::process::ProcessHandle;

/// Per-launch options.
#[derive(Debug, Clone, Default)]
pub struct LaunchParams {
    /// Launcher-specific requirements from the extension manifest.
    pub requirements: Value,
    /// Aborts a launch in progress. Native launchers also kill a child that is
    /// still running when the token fires.
    pub cancel: Option<CancellationToken>,
}

impl LaunchParams {
    pub fn with_requirements(requirements: Value) -> Self {
        Self {
            requirements,
            cancel: None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Starts a unit of execution and hands back its [`ProcessHandle`].
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        path: &Path,
        args: &[String],
        params: LaunchParams,
    ) -> Result<ProcessHandle, KeelError>;
}
