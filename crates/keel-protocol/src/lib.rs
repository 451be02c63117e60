// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The keel extension protocol.
//!
//! Extensions are separate processes that exchange `Content-Length` framed
//! JSON-RPC messages with the host over stdin/stdout. This crate provides the
//! framing, the message model, request correlation with per-request
//! deadlines, the shutdown escalation ladder, and [`Extension`], which turns a
//! launched process into a component implementation.

pub mod codec;
pub mod extension;
pub mod manifest;
pub mod message;
pub mod pending;
pub mod shutdown;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use codec::{FrameDecoder, MAX_FRAME_LEN, encode_frame};
pub use extension::{DEFAULT_REQUEST_TIMEOUT, Extension, ExtensionOptions};
pub use manifest::{ExtensionManifest, LauncherSpec, MANIFEST_FILE};
pub use message::{Message, methods};
pub use pending::{PendingRequest, PendingTable};
pub use shutdown::{
    ShutdownEvent, ShutdownLadder, ShutdownMachine, ShutdownStage, Terminable, Transition, escalate,
};
