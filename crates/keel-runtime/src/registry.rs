// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component registry: registration, dependency-ordered lifecycle, and the
//! gated call/notify/event routing between components.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_core::{
    ComponentId, ComponentImpl, ComponentManifest, ContributionKind, Dispatcher, EventListener,
    KeelError, Subscription,
};

use crate::context::RuntimeContext;
use crate::instance::ComponentInstance;
use crate::objects::ObjectRegistry;
use crate::settings::{SchemaDefaults, SettingsStore};

/// Registry of all components known to one host.
pub struct ComponentRegistry {
    components: RwLock<HashMap<ComponentId, Arc<ComponentInstance>>>,
    /// Ids in the order their activation completed.
    activation_order: Mutex<Vec<ComponentId>>,
    objects: Arc<ObjectRegistry>,
    settings: Arc<dyn SettingsStore>,
    shutdown: CancellationToken,
    this: Weak<ComponentRegistry>,
}

impl ComponentRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_settings(Arc::new(SchemaDefaults))
    }

    pub fn with_settings(settings: Arc<dyn SettingsStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            components: RwLock::new(HashMap::new()),
            activation_order: Mutex::new(Vec::new()),
            objects: Arc::new(ObjectRegistry::new()),
            settings,
            shutdown: CancellationToken::new(),
            this: this.clone(),
        })
    }

    pub fn objects(&self) -> &Arc<ObjectRegistry> {
        &self.objects
    }

    /// Adds a component. Names are unique regardless of version.
    pub fn register_component(
        &self,
        manifest: ComponentManifest,
        implementation: Arc<dyn ComponentImpl>,
    ) -> Result<Arc<ComponentInstance>, KeelError> {
        manifest.validate()?;
        let id = manifest.id();
        let mut components = self.components.write().unwrap_or_else(PoisonError::into_inner);
        if components.contains_key(&id) {
            return Err(KeelError::InvalidRequest(format!(
                "component '{id}' is already registered"
            )));
        }
        let instance = ComponentInstance::new(manifest, implementation);
        components.insert(id.clone(), Arc::clone(&instance));
        info!(component = %id, version = instance.manifest().version.as_deref().unwrap_or("-"), "component registered");
        Ok(instance)
    }

    /// Looks a component up by name. The version does not take part in
    /// identity and is ignored.
    pub fn find_component(&self, name: &str, _version: Option<&str>) -> Option<Arc<ComponentInstance>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn find_component_by_id(&self, id: &ComponentId) -> Option<Arc<ComponentInstance>> {
        self.find_component(id.as_str(), None)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.find_component_by_id(id).is_some()
    }

    /// Registered ids, sorted.
    pub fn component_list(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Active ids in the order they finished activating.
    pub fn activated_list(&self) -> Vec<ComponentId> {
        self.activation_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn instance(&self, id: &ComponentId) -> Result<Arc<ComponentInstance>, KeelError> {
        self.find_component_by_id(id)
            .ok_or_else(|| KeelError::InvalidParams(format!("unknown component '{id}'")))
    }

    pub async fn initialize_component(&self, id: &ComponentId) -> Result<(), KeelError> {
        let instance = self.instance(id)?;
        let _lifecycle = instance.lock_lifecycle().await;
        instance.initialize_locked().await
    }

    /// Activates `id` after all of its dependencies. Already active components
    /// return immediately.
    pub async fn activate_component(&self, id: &ComponentId) -> Result<(), KeelError> {
        self.activate_chain(id.clone(), Vec::new()).await
    }

    fn activate_chain(
        &self,
        id: ComponentId,
        mut chain: Vec<ComponentId>,
    ) -> BoxFuture<'_, Result<(), KeelError>> {
        Box::pin(async move {
            if chain.contains(&id) {
                let mut path: Vec<&str> = chain.iter().map(ComponentId::as_str).collect();
                path.push(id.as_str());
                return Err(KeelError::InvalidRequest(format!(
                    "dependency cycle {}",
                    path.join(" -> ")
                )));
            }

            let instance = self.instance(&id)?;
            let _activating = {
                let _lifecycle = instance.lock_lifecycle().await;
                if instance.is_activated() {
                    return Ok(());
                }
                // Already under way further up this activation, or in another
                // task; either way it is not this call's to finish.
                let Some(mark) = instance.begin_activation() else {
                    debug!(component = %id, "activation already in progress");
                    return Ok(());
                };
                instance.initialize_locked().await?;
                mark
            };

            chain.push(id.clone());
            for dependency in &instance.manifest().dependencies {
                let dependency_id = dependency.id();
                if dependency_id == id {
                    continue;
                }
                let Some(resolved) = self.find_component_by_id(&dependency_id) else {
                    return Err(KeelError::InvalidRequest(format!(
                        "component '{id}' depends on unregistered '{dependency_id}'"
                    )));
                };
                if !dependency.accepts(resolved.manifest().version.as_deref()) {
                    warn!(
                        component = %id,
                        dependency = %dependency_id,
                        required = dependency.version.as_deref().unwrap_or("*"),
                        found = resolved.manifest().version.as_deref().unwrap_or("-"),
                        "dependency version does not satisfy requirement"
                    );
                }
                if let Err(e) = self.activate_chain(dependency_id.clone(), chain.clone()).await {
                    error!(component = %id, dependency = %dependency_id, error = %e, "dependency failed to activate");
                    return Err(e);
                }
            }

            let interfaces: Vec<String> = instance
                .manifest()
                .contributions
                .names(ContributionKind::Interface)
                .map(|name| format!("{id}/{name}"))
                .collect();
            for interface in &interfaces {
                self.objects.register_interface(interface.clone(), &instance);
            }

            let context = Arc::new(RuntimeContext::new(&instance, self.this.clone()));
            let settings = self.settings.settings_for(instance.manifest());
            let cancel = self.shutdown.child_token();
            let activated = instance.run_activate(context, settings, cancel).await;

            let _lifecycle = instance.lock_lifecycle().await;
            let outcome = match activated {
                Ok(()) if instance.is_initialized() => {
                    instance.commit_activation_locked();
                    Ok(())
                }
                Ok(()) => {
                    instance.abandon_activation_locked().await;
                    Err(KeelError::Cancelled(format!(
                        "component '{id}' was shut down while activating"
                    )))
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.objects.unregister_interfaces_of(&id).await;
                self.objects.drop_objects_owned_by(&id);
                return Err(e);
            }

            self.activation_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id.clone());
            info!(component = %id, "component activated");
            Ok(())
        })
    }

    pub async fn deactivate_component(&self, id: &ComponentId) -> Result<(), KeelError> {
        let instance = self.instance(id)?;
        let _lifecycle = instance.lock_lifecycle().await;
        self.deactivate_held(&instance).await
    }

    /// Caller holds the instance's lifecycle lock.
    async fn deactivate_held(&self, instance: &ComponentInstance) -> Result<(), KeelError> {
        if !instance.is_activated() {
            return Ok(());
        }
        let id = instance.id();
        let result = instance.deactivate_locked().await;
        self.objects.unregister_interfaces_of(id).await;
        self.activation_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|active| active != id);
        info!(component = %id, "component deactivated");
        result
    }

    /// Deactivates if needed, then releases what initialization acquired.
    pub async fn uninitialize_component(&self, id: &ComponentId) -> Result<(), KeelError> {
        let instance = self.instance(id)?;
        let _lifecycle = instance.lock_lifecycle().await;
        let deactivated = self.deactivate_held(&instance).await;
        let shut_down = instance.shutdown_locked().await;
        debug!(component = %id, "component uninitialized");
        deactivated.and(shut_down)
    }

    /// Uninitializes and forgets a component. It is removed even when its
    /// teardown fails.
    pub async fn unregister_component(&self, id: &ComponentId) -> Result<(), KeelError> {
        let result = self.uninitialize_component(id).await;
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        info!(component = %id, "component unregistered");
        result
    }

    /// Activates every registered component. One failure never stops the
    /// others; failures are returned.
    pub async fn startup(&self) -> Vec<(ComponentId, KeelError)> {
        let mut failures = Vec::new();
        for id in self.component_list() {
            if let Err(e) = self.activate_component(&id).await {
                error!(component = %id, error = %e, "component failed to start");
                failures.push((id, e));
            }
        }
        failures
    }

    /// Cancels pending activations, deactivates in reverse activation order,
    /// then uninitializes everything.
    pub async fn shutdown(&self) -> Result<(), KeelError> {
        self.shutdown.cancel();
        let mut errors = Vec::new();

        let mut order = self.activated_list();
        order.reverse();
        for id in order {
            if let Err(e) = self.deactivate_component(&id).await {
                warn!(component = %id, error = %e, "component failed to deactivate during shutdown");
                errors.push(e);
            }
        }
        for id in self.component_list() {
            if let Err(e) = self.uninitialize_component(&id).await {
                warn!(component = %id, error = %e, "component failed to shut down");
                errors.push(e);
            }
        }

        info!("component registry shut down");
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(KeelError::Aggregate(errors)),
        }
    }

    /// Whether `shutdown` has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn route(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
    ) -> Result<(Arc<ComponentInstance>, Arc<ComponentInstance>), KeelError> {
        let target = self
            .find_component_by_id(target)
            .ok_or_else(|| KeelError::MethodNotFound(format!("unknown component '{target}'")))?;
        let caller = self
            .find_component_by_id(caller)
            .ok_or_else(|| KeelError::InvalidRequest(format!("unknown caller '{caller}'")))?;
        Ok((caller, target))
    }

    pub async fn call(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        let (caller, target) = self.route(caller, target)?;
        debug!(caller = %caller.id(), target = %target.id(), method, "call");
        target.call(&caller, method, params).await
    }

    pub async fn notify(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        let (caller, target) = self.route(caller, target)?;
        debug!(caller = %caller.id(), target = %target.id(), notification, "notify");
        target.notify(&caller, notification, params).await
    }

    /// Subscribes `subscriber` to `event` of `target`. The listener also
    /// receives events `target` sends to `subscriber` alone, and is removed
    /// when `subscriber` deactivates.
    pub fn on_event(
        &self,
        subscriber: &ComponentId,
        target: &ComponentId,
        event: &str,
        listener: EventListener,
    ) -> Result<Subscription, KeelError> {
        let target = self.instance(target)?;
        let subscriber = self
            .find_component_by_id(subscriber)
            .ok_or_else(|| KeelError::InvalidRequest(format!("unknown subscriber '{subscriber}'")))?;
        if !target.declares_event(event) {
            return Err(KeelError::InvalidParams(format!(
                "component '{}' declares no event '{event}'",
                target.id()
            )));
        }

        let own = target.subscribe_event(event, Arc::clone(&listener));
        let targeted = subscriber.subscribe_targeted(target.id(), event, listener);
        let subscription = Subscription::all(vec![own, targeted]);
        subscriber.manage(subscription.clone());
        Ok(subscription)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.component_list())
            .field("activated", &self.activated_list())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dispatcher for ComponentRegistry {
    async fn dispatch_call(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        self.call(caller, target, method, params).await
    }

    async fn dispatch_notify(
        &self,
        caller: &ComponentId,
        target: &ComponentId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        self.notify(caller, target, notification, params).await
    }
}
