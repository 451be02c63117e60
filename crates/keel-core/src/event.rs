// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-listener event emitter with explicit disposal tokens.
//!
//! Listeners are kept in an ordered map keyed by a per-emitter token, so
//! removal is O(log n) and never depends on closure identity. Emission takes a
//! snapshot of the listeners and invokes them outside the lock, which makes it
//! safe for a listener to subscribe, unsubscribe, or emit again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Listener for component events; receives the event payload.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

struct Listeners<T> {
    next_token: u64,
    entries: BTreeMap<u64, Listener<T>>,
    disposed: bool,
}

/// A publish/subscribe channel for values of type `T`.
///
/// Cloning an emitter yields another handle to the same listener set.
pub struct Emitter<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_token: 0,
                entries: BTreeMap::new(),
                disposed: false,
            })),
        }
    }

    /// Adds a listener. Disposing the returned token removes it again.
    ///
    /// Subscribing to a disposed emitter is accepted and does nothing.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let token = {
            let mut listeners = self.lock();
            if listeners.disposed {
                return Subscription::none();
            }
            let token = listeners.next_token;
            listeners.next_token += 1;
            listeners.entries.insert(token, Arc::new(listener));
            token
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .remove(&token);
            }
        })
    }

    /// Delivers `value` to every listener registered at the time of the call.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self.lock().entries.values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    /// Drops every listener and refuses new ones.
    pub fn dispose(&self) {
        let mut listeners = self.lock();
        listeners.disposed = true;
        listeners.entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners<T>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Disposal token for a registration.
///
/// Clones share the same teardown, which runs at most once no matter how many
/// clones are disposed. Dropping a token without disposing it leaves the
/// registration in place.
#[derive(Clone)]
pub struct Subscription {
    teardown: Arc<Mutex<Option<Teardown>>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Arc::new(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// A token with nothing to tear down.
    pub fn none() -> Self {
        Self {
            teardown: Arc::new(Mutex::new(None)),
        }
    }

    /// Combines several tokens into one.
    pub fn all(parts: Vec<Subscription>) -> Self {
        Self::new(move || {
            for part in parts {
                part.dispose();
            }
        })
    }

    pub fn dispose(&self) {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
