// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the keel plugin host.
//!
//! This crate provides the error taxonomy, identifiers, manifest model, event
//! and disposal plumbing, and the traits every component implementation and
//! host capability is expressed through.

pub mod component;
pub mod dispose;
pub mod error;
pub mod event;
pub mod manifest;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use component::{
    Caller, CallerScope, ComponentContext, ComponentImpl, Dispatcher, EventSink, OBJECT_CALL,
    OBJECT_DESTROY, OBJECT_NOTIFY,
};
pub use dispose::{DisposeList, Disposer};
pub use error::{ErrorCode, KeelError, RpcError};
pub use event::{Emitter, EventListener, Subscription};
pub use manifest::{ComponentManifest, Contribution, ContributionKind, Contributions, Dependency, Schema};
pub use types::{ComponentId, ObjectId};
