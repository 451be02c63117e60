// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability object an active component reaches the host through.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use keel_core::{
    ComponentContext, ComponentId, Disposer, EventListener, KeelError, ObjectId, Subscription,
};

use crate::instance::ComponentInstance;
use crate::registry::ComponentRegistry;

/// Every operation runs under the owning component's identity. Only weak
/// references are held so a component keeping its context alive does not
/// keep the host alive.
pub(crate) struct RuntimeContext {
    id: ComponentId,
    instance: Weak<ComponentInstance>,
    registry: Weak<ComponentRegistry>,
}

impl RuntimeContext {
    pub(crate) fn new(instance: &Arc<ComponentInstance>, registry: Weak<ComponentRegistry>) -> Self {
        Self {
            id: instance.id().clone(),
            instance: Arc::downgrade(instance),
            registry,
        }
    }

    fn instance(&self) -> Result<Arc<ComponentInstance>, KeelError> {
        self.instance
            .upgrade()
            .ok_or_else(|| KeelError::InvalidRequest(format!("component '{}' is gone", self.id)))
    }

    fn registry(&self) -> Result<Arc<ComponentRegistry>, KeelError> {
        self.registry
            .upgrade()
            .ok_or_else(|| KeelError::Cancelled("host is shutting down".to_string()))
    }
}

#[async_trait]
impl ComponentContext for RuntimeContext {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn manage(&self, disposer: Disposer) {
        match self.instance.upgrade() {
            Some(instance) => instance.manage(disposer),
            None => tracing::debug!(component = %self.id, "dropping disposer for a gone component"),
        }
    }

    fn emit_event(&self, event: &str, params: Value) {
        if let Some(instance) = self.instance.upgrade() {
            instance.emit_declared(event, params);
        }
    }

    async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value, KeelError> {
        self.registry()?
            .call(&self.id, &ComponentId::from(target), method, params)
            .await
    }

    async fn notify(
        &self,
        target: &str,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        self.registry()?
            .notify(&self.id, &ComponentId::from(target), notification, params)
            .await
    }

    fn on_event(
        &self,
        target: &str,
        event: &str,
        listener: EventListener,
    ) -> Result<Subscription, KeelError> {
        self.registry()?
            .on_event(&self.id, &ComponentId::from(target), event, listener)
    }

    fn create_object(&self, object_name: &str, interface: &str) -> Result<ObjectId, KeelError> {
        let instance = self.instance()?;
        self.registry()?
            .objects()
            .create_object(&instance, object_name, interface)
    }

    fn destroy_object(&self, object: ObjectId) -> Result<(), KeelError> {
        self.registry()?.objects().destroy_object(&self.id, object)
    }

    fn find_object(&self, interface: &str, object_name: &str) -> Result<ObjectId, KeelError> {
        self.registry()?.objects().find_object(interface, object_name)
    }

    fn object_list(&self, interface: &str) -> Result<Vec<ObjectId>, KeelError> {
        self.registry()?.objects().object_list(interface)
    }

    async fn object_call(
        &self,
        object: ObjectId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        let instance = self.instance()?;
        let registry = self.registry()?;
        registry.objects().call(&instance, object, method, params).await
    }

    async fn object_notify(
        &self,
        object: ObjectId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        let instance = self.instance()?;
        let registry = self.registry()?;
        registry
            .objects()
            .notify(&instance, object, notification, params)
            .await
    }
}
