// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime side of the keel host.
//!
//! [`ComponentRegistry`] drives every component through
//! initialize/activate/deactivate/shutdown in dependency order and routes
//! calls, notifications and events between them. [`ObjectRegistry`] tracks
//! interface objects. [`Host`] ties both to the launchers and loads
//! extensions.

pub mod builtin;
mod context;
pub mod host;
pub mod instance;
pub mod objects;
pub mod registry;
pub mod settings;

pub use builtin::{CORE_COMPONENT, CoreComponent};
pub use host::Host;
pub use instance::{ACTIVATE_EVENT, ComponentInstance, DEACTIVATE_EVENT};
pub use objects::{OBJECT_CREATED_EVENT, ObjectInfo, ObjectRegistry};
pub use registry::ComponentRegistry;
pub use settings::{SchemaDefaults, SettingsStore};
