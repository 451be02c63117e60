// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launchers for keel extensions.
//!
//! A [`Launcher`] starts a unit of execution for a [`Target`] triple and
//! returns a [`ProcessHandle`]: stdin/stdout/stderr streams, a signal channel,
//! and an exit notification. Three strategies ship with the host: native
//! executables, child copies of the host runtime, and in-process modules.

pub mod child;
pub mod inline;
pub mod launcher;
pub mod native;
pub mod process;
pub mod registry;
pub mod target;

pub use child::ChildRuntimeLauncher;
pub use inline::{InlineIo, InlineLauncher, InlineModule};
pub use launcher::{LaunchParams, Launcher};
pub use native::NativeLauncher;
pub use process::{ExitNotifier, ExitStatus, ProcessControl, ProcessHandle, Signal};
pub use registry::LauncherRegistry;
pub use target::Target;
