// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compositional disposer used for cleanup-on-close.
//!
//! A [`DisposeList`] accumulates teardown work while a component is active and
//! runs all of it, in insertion order, when the component deactivates.

use std::future::Future;

use futures::future::BoxFuture;

use crate::error::KeelError;
use crate::event::Subscription;

/// One unit of teardown work.
pub enum Disposer {
    Sync(Box<dyn FnOnce() + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), KeelError>> + Send>),
}

impl Disposer {
    pub fn from_fn(teardown: impl FnOnce() + Send + 'static) -> Self {
        Disposer::Sync(Box::new(teardown))
    }

    pub fn from_future<F, Fut>(teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), KeelError>> + Send + 'static,
    {
        Disposer::Async(Box::new(move || Box::pin(teardown())))
    }

    async fn run(self) -> Result<(), KeelError> {
        match self {
            Disposer::Sync(teardown) => {
                teardown();
                Ok(())
            }
            Disposer::Async(teardown) => teardown().await,
        }
    }
}

impl From<Subscription> for Disposer {
    fn from(subscription: Subscription) -> Self {
        Disposer::from_fn(move || subscription.dispose())
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposer::Sync(_) => f.write_str("Disposer::Sync"),
            Disposer::Async(_) => f.write_str("Disposer::Async"),
        }
    }
}

/// An ordered list of pending teardown work.
#[derive(Debug, Default)]
pub struct DisposeList {
    items: Vec<Disposer>,
}

impl DisposeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disposer: impl Into<Disposer>) {
        self.items.push(disposer.into());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Moves the accumulated work out, leaving an empty list behind.
    pub fn take(&mut self) -> DisposeList {
        std::mem::take(self)
    }

    /// Runs every disposer even if earlier ones fail.
    ///
    /// A single failure is returned as-is; several are wrapped in
    /// [`KeelError::Aggregate`].
    pub async fn dispose(self) -> Result<(), KeelError> {
        let mut errors = Vec::new();
        for disposer in self.items {
            if let Err(err) = disposer.run().await {
                errors.push(err);
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(KeelError::Aggregate(errors)),
        }
    }
}
