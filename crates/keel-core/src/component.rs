// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traits at the seams between the registry and component implementations.
//!
//! Implementations never see the registry itself. They receive capability
//! objects instead: a [`ComponentContext`] while active, and a [`Caller`] view
//! of whoever invoked them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dispose::Disposer;
use crate::error::KeelError;
use crate::event::{EventListener, Subscription};
use crate::types::{ComponentId, ObjectId};

/// Method used to deliver an object-scoped call to the owning component.
pub const OBJECT_CALL: &str = "$/object/call";
/// Notification used to deliver an object-scoped notification.
pub const OBJECT_NOTIFY: &str = "$/object/notify";
/// Notification telling an owner that one of its objects was dropped.
pub const OBJECT_DESTROY: &str = "$/object/destroy";

/// Callback a component uses to emit its own events.
pub type EventSink = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// The implementation behind a registered component.
///
/// In-process components implement this directly; out-of-process extensions
/// are represented by a protocol proxy implementing it.
#[async_trait]
pub trait ComponentImpl: Send + Sync + 'static {
    /// One-time setup. `events` stays valid for the lifetime of the instance.
    async fn initialize(&self, events: EventSink) -> Result<(), KeelError>;

    async fn activate(
        &self,
        context: Arc<dyn ComponentContext>,
        settings: Value,
        cancel: CancellationToken,
    ) -> Result<(), KeelError>;

    async fn deactivate(&self) -> Result<(), KeelError>;

    async fn call(&self, caller: Caller, method: &str, params: Value) -> Result<Value, KeelError> {
        let _ = params;
        Err(KeelError::MethodNotFound(format!(
            "{}: no handler for method '{method}'",
            caller.id()
        )))
    }

    async fn notify(
        &self,
        caller: Caller,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        let _ = params;
        Err(KeelError::MethodNotFound(format!(
            "{}: no handler for notification '{notification}'",
            caller.id()
        )))
    }

    /// Releases initialization resources.
    async fn dispose(&self) -> Result<(), KeelError> {
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Lifetime hooks behind a [`Caller`] view.
pub trait CallerScope: Send + Sync {
    /// Runs `listener` when the calling component deactivates.
    fn on_close(&self, listener: Box<dyn Fn() + Send + Sync>) -> Result<Subscription, KeelError>;

    /// Sends an event from the callee to this caller only.
    fn send_event(&self, event: &str, params: Value);

    fn pid(&self) -> Option<u32>;
}

/// Restricted view of the component that issued a call.
///
/// Carries the caller's identity and lifetime hooks, never the instance.
#[derive(Clone)]
pub struct Caller {
    id: ComponentId,
    scope: Arc<dyn CallerScope>,
}

impl Caller {
    pub fn new(id: ComponentId, scope: Arc<dyn CallerScope>) -> Self {
        Self { id, scope }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn on_close(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription, KeelError> {
        self.scope.on_close(Box::new(listener))
    }

    pub fn send_event(&self, event: &str, params: Value) {
        self.scope.send_event(event, params);
    }

    pub fn pid(&self) -> Option<u32> {
        self.scope.pid()
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller").field("id", &self.id).finish()
    }
}

/// Capabilities handed to a component while it is active.
///
/// Everything a component may do to the rest of the host goes through here,
/// always under the component's own identity.
#[async_trait]
pub trait ComponentContext: Send + Sync {
    fn id(&self) -> &ComponentId;

    /// Ties `disposer` to the component's activation; it runs on deactivate.
    fn manage(&self, disposer: Disposer);

    fn emit_event(&self, event: &str, params: Value);

    async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value, KeelError>;

    async fn notify(&self, target: &str, notification: &str, params: Value)
    -> Result<(), KeelError>;

    fn on_event(
        &self,
        target: &str,
        event: &str,
        listener: EventListener,
    ) -> Result<Subscription, KeelError>;

    fn create_object(&self, object_name: &str, interface: &str) -> Result<ObjectId, KeelError>;

    fn destroy_object(&self, object: ObjectId) -> Result<(), KeelError>;

    fn find_object(&self, interface: &str, object_name: &str) -> Result<ObjectId, KeelError>;

    fn object_list(&self, interface: &str) -> Result<Vec<ObjectId>, KeelError>;

    async fn object_call(
        &self,
        object: ObjectId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError>;

    async fn object_notify(
        &self,
        object: ObjectId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError>;
}

/// Routes calls that arrive from an extension back into the registry.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch_call(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError>;

    async fn dispatch_notify(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError>;
}
