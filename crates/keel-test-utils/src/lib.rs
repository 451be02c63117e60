// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for keel integration tests.
//!
//! - [`Journal`] - shared, ordered log of lifecycle steps across components
//! - [`MockComponent`] - in-process component with scripted failures that
//!   echoes its calls and keeps its context for later use

pub mod journal;
pub mod mock_component;

pub use journal::Journal;
pub use mock_component::MockComponent;
