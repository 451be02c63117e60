// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One registered component: manifest, implementation, lifecycle flags, event
//! emitters and the resources acquired while active.
//!
//! Lifecycle transitions are serialized by a per-instance async lock that the
//! registry takes; the `*_locked` methods here assume it is held. The lock is
//! not held while the implementation's own `activate` runs, so an activating
//! component can reach back into the registry. The `activating` marker stands
//! in for it meanwhile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use keel_core::{
    Caller, CallerScope, ComponentContext, ComponentId, ComponentImpl, ComponentManifest,
    ContributionKind, DisposeList, Disposer, Emitter, EventListener, EventSink, KeelError,
    OBJECT_CALL, OBJECT_DESTROY, OBJECT_NOTIFY, ObjectId, Subscription,
};

/// Emitted after a component's own `activate` succeeds.
pub const ACTIVATE_EVENT: &str = "activate";
/// Emitted first thing when a component deactivates.
pub const DEACTIVATE_EVENT: &str = "deactivate";

pub struct ComponentInstance {
    id: ComponentId,
    manifest: Arc<ComponentManifest>,
    implementation: Arc<dyn ComponentImpl>,
    lifecycle: AsyncMutex<()>,
    initialized: AtomicBool,
    activated: AtomicBool,
    activating: AtomicBool,
    /// This component's own events, by name.
    events: EventTable,
    /// Events other components sent to this one alone, keyed `<sender>/<event>`.
    targeted: EventTable,
    resources: Mutex<DisposeList>,
    this: Weak<ComponentInstance>,
}

impl ComponentInstance {
    pub(crate) fn new(manifest: ComponentManifest, implementation: Arc<dyn ComponentImpl>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: manifest.id(),
            manifest: Arc::new(manifest),
            implementation,
            lifecycle: AsyncMutex::new(()),
            initialized: AtomicBool::new(false),
            activated: AtomicBool::new(false),
            activating: AtomicBool::new(false),
            events: Mutex::new(HashMap::new()),
            targeted: Mutex::new(HashMap::new()),
            resources: Mutex::new(DisposeList::new()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn manifest(&self) -> &Arc<ComponentManifest> {
        &self.manifest
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.implementation.pid()
    }

    pub(crate) async fn lock_lifecycle(&self) -> AsyncMutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    pub(crate) async fn initialize_locked(&self) -> Result<(), KeelError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.implementation.initialize(self.event_sink()).await?;
        self.initialized.store(true, Ordering::SeqCst);
        debug!(component = %self.id, "component initialized");
        Ok(())
    }

    /// Marks an activation as in progress until the returned guard drops.
    /// `None` when one already is.
    pub(crate) fn begin_activation(&self) -> Option<ActivationMark<'_>> {
        if self.activating.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(ActivationMark(&self.activating))
        }
    }

    pub fn is_activating(&self) -> bool {
        self.activating.load(Ordering::SeqCst)
    }

    /// Runs the implementation's `activate` without the lifecycle lock.
    /// Resources acquired by a failed attempt are released.
    pub(crate) async fn run_activate(
        &self,
        context: Arc<dyn ComponentContext>,
        settings: Value,
        cancel: CancellationToken,
    ) -> Result<(), KeelError> {
        if let Err(e) = self.implementation.activate(context, settings, cancel).await {
            if let Err(cleanup) = self.release_resources().await {
                warn!(component = %self.id, error = %cleanup, "cleanup after failed activation failed");
            }
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn commit_activation_locked(&self) {
        self.activated.store(true, Ordering::SeqCst);
        self.emit(ACTIVATE_EVENT, Value::Null);
    }

    /// Undoes an `activate` that finished after the component was torn down.
    pub(crate) async fn abandon_activation_locked(&self) {
        if let Err(e) = self.implementation.deactivate().await {
            warn!(component = %self.id, error = %e, "abandoned activation failed to deactivate");
        }
        if let Err(e) = self.release_resources().await {
            warn!(component = %self.id, error = %e, "failed to release abandoned activation");
        }
    }

    /// Reverses activation. Every step runs even if an earlier one fails; the
    /// first failure is returned.
    pub(crate) async fn deactivate_locked(&self) -> Result<(), KeelError> {
        if !self.activated.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit(DEACTIVATE_EVENT, Value::Null);

        let deactivated = self.implementation.deactivate().await;
        if let Err(e) = &deactivated {
            warn!(component = %self.id, error = %e, "component failed to deactivate cleanly");
        }
        let released = self.release_resources().await;
        if let Err(e) = &released {
            warn!(component = %self.id, error = %e, "failed to release component resources");
        }
        deactivated.and(released)
    }

    /// Deactivates if needed, then releases what `initialize` acquired.
    pub(crate) async fn shutdown_locked(&self) -> Result<(), KeelError> {
        let deactivated = self.deactivate_locked().await;
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return deactivated;
        }
        let disposed = self.implementation.dispose().await;
        if let Err(e) = &disposed {
            warn!(component = %self.id, error = %e, "component failed to dispose");
        }
        deactivated.and(disposed)
    }

    async fn release_resources(&self) -> Result<(), KeelError> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        resources.dispose().await
    }

    /// Ties `disposer` to the current activation.
    pub fn manage(&self, disposer: impl Into<Disposer>) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(disposer);
    }

    fn event_sink(&self) -> EventSink {
        let this = self.this.clone();
        Arc::new(move |event: &str, params: Value| {
            if let Some(instance) = this.upgrade() {
                instance.emit_declared(event, params);
            }
        })
    }

    /// Emits one of the events this component declares; anything else is
    /// dropped with a warning.
    pub fn emit_declared(&self, event: &str, params: Value) {
        if self.manifest.contributions.contains(ContributionKind::Event, event) {
            self.emit(event, params);
        } else {
            warn!(component = %self.id, event, "dropping undeclared event");
        }
    }

    /// Delivers `params` to every listener of one of this component's events.
    pub(crate) fn emit(&self, event: &str, params: Value) {
        let emitter = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned();
        if let Some(emitter) = emitter {
            emitter.emit(&params);
        }
    }

    pub fn declares_event(&self, event: &str) -> bool {
        event == ACTIVATE_EVENT
            || event == DEACTIVATE_EVENT
            || self.manifest.contributions.contains(ContributionKind::Event, event)
    }

    pub(crate) fn subscribe_event(&self, event: &str, listener: EventListener) -> Subscription {
        self.subscribe_in(own_events, event.to_string(), listener)
    }

    pub(crate) fn subscribe_targeted(
        &self,
        sender: &ComponentId,
        event: &str,
        listener: EventListener,
    ) -> Subscription {
        self.subscribe_in(targeted_events, format!("{sender}/{event}"), listener)
    }

    /// Subscribes under `key`; the entry goes away with its last listener.
    fn subscribe_in(&self, table: TableOf, key: String, listener: EventListener) -> Subscription {
        let registration = {
            let mut emitters = table(self).lock().unwrap_or_else(PoisonError::into_inner);
            emitters
                .entry(key.clone())
                .or_default()
                .subscribe(move |params| listener(params))
        };
        let this = self.this.clone();
        Subscription::new(move || {
            registration.dispose();
            let Some(instance) = this.upgrade() else {
                return;
            };
            let mut emitters = table(&instance).lock().unwrap_or_else(PoisonError::into_inner);
            if emitters.get(&key).is_some_and(|emitter| !emitter.has_listeners()) {
                emitters.remove(&key);
            }
        })
    }

    /// An event `sender` addressed to this component only.
    pub(crate) fn receive_targeted(&self, sender: &ComponentId, event: &str, params: Value) {
        let emitter = self
            .targeted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&format!("{sender}/{event}"))
            .cloned();
        match emitter {
            Some(emitter) => emitter.emit(&params),
            None => debug!(component = %self.id, sender = %sender, event, "no listener for targeted event"),
        }
    }

    /// The restricted view of `self` handed to `callee`.
    pub(crate) fn caller_view(&self, callee: &ComponentInstance) -> Caller {
        Caller::new(
            self.id.clone(),
            Arc::new(CallerLink {
                caller: self.this.clone(),
                callee: callee.id.clone(),
            }),
        )
    }

    fn ensure_activated(&self) -> Result<(), KeelError> {
        if self.is_activated() {
            Ok(())
        } else {
            Err(KeelError::InvalidRequest(format!(
                "component '{}' is not activated",
                self.id
            )))
        }
    }

    fn ensure_declared(&self, kind: ContributionKind, name: &str) -> Result<(), KeelError> {
        if self.manifest.contributions.contains(kind, name) {
            Ok(())
        } else {
            Err(KeelError::InvalidParams(format!(
                "component '{}' declares no {kind} '{name}'",
                self.id
            )))
        }
    }

    pub(crate) async fn call(
        &self,
        caller: &ComponentInstance,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        self.ensure_activated()?;
        self.ensure_declared(ContributionKind::Method, method)?;
        self.implementation
            .call(caller.caller_view(self), method, params)
            .await
    }

    pub(crate) async fn notify(
        &self,
        caller: &ComponentInstance,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        self.ensure_activated()?;
        self.ensure_declared(ContributionKind::Notification, notification)?;
        self.implementation
            .notify(caller.caller_view(self), notification, params)
            .await
    }

    pub(crate) async fn object_call(
        &self,
        caller: &ComponentInstance,
        object: ObjectId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        self.ensure_activated()?;
        let params = json!({"object": object, "method": method, "params": params});
        self.implementation
            .call(caller.caller_view(self), OBJECT_CALL, params)
            .await
    }

    pub(crate) async fn object_notify(
        &self,
        caller: &ComponentInstance,
        object: ObjectId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        self.ensure_activated()?;
        let params = json!({"object": object, "notification": notification, "params": params});
        self.implementation
            .notify(caller.caller_view(self), OBJECT_NOTIFY, params)
            .await
    }

    /// Tells the owner that one of its objects was dropped with its interface.
    pub(crate) async fn object_destroyed(
        &self,
        provider: &ComponentInstance,
        object: ObjectId,
        interface: &str,
    ) -> Result<(), KeelError> {
        if !self.is_activated() {
            return Ok(());
        }
        let params = json!({"objectId": object, "interface": interface});
        self.implementation
            .notify(provider.caller_view(self), OBJECT_DESTROY, params)
            .await
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .field("activated", &self.is_activated())
            .finish_non_exhaustive()
    }
}

type EventTable = Mutex<HashMap<String, Emitter<Value>>>;
type TableOf = fn(&ComponentInstance) -> &EventTable;

fn own_events(instance: &ComponentInstance) -> &EventTable {
    &instance.events
}

fn targeted_events(instance: &ComponentInstance) -> &EventTable {
    &instance.targeted
}

/// Clears the `activating` flag on drop.
pub(crate) struct ActivationMark<'a>(&'a AtomicBool);

impl Drop for ActivationMark<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Backs a [`Caller`]: the caller's close hook and a return path for events.
struct CallerLink {
    caller: Weak<ComponentInstance>,
    callee: ComponentId,
}

impl CallerScope for CallerLink {
    fn on_close(&self, listener: Box<dyn Fn() + Send + Sync>) -> Result<Subscription, KeelError> {
        let caller = self
            .caller
            .upgrade()
            .ok_or_else(|| KeelError::InvalidRequest("calling component is gone".to_string()))?;
        Ok(caller.subscribe_event(DEACTIVATE_EVENT, Arc::new(move |_: &Value| listener())))
    }

    fn send_event(&self, event: &str, params: Value) {
        if let Some(caller) = self.caller.upgrade() {
            caller.receive_targeted(&self.callee, event, params);
        }
    }

    fn pid(&self) -> Option<u32> {
        self.caller.upgrade().and_then(|caller| caller.pid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use keel_test_utils::{Journal, MockComponent};

    fn instance(name: &str, journal: &Journal) -> Arc<ComponentInstance> {
        let manifest = ComponentManifest::named(name)
            .with_contribution(ContributionKind::Method, "open")
            .with_contribution(ContributionKind::Event, "opened");
        ComponentInstance::new(manifest, MockComponent::new(name, journal).build())
    }

    #[tokio::test]
    async fn only_declared_events_leave_the_sink() {
        let journal = Journal::new();
        let gui = instance("gui", &journal);
        let hits = Arc::new(AtomicUsize::new(0));
        for event in ["opened", "closed"] {
            let hits = Arc::clone(&hits);
            gui.subscribe_event(
                event,
                Arc::new(move |_: &Value| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let sink = gui.event_sink();
        sink("opened", Value::Null);
        sink("closed", Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(gui.declares_event("activate"));
        assert!(!gui.declares_event("closed"));
    }

    #[tokio::test]
    async fn calls_are_gated_on_activation_and_contributions() {
        let journal = Journal::new();
        let gui = instance("gui", &journal);
        let ui = instance("ui", &journal);

        let err = gui.call(&ui, "open", Value::Null).await.unwrap_err();
        assert!(matches!(err, KeelError::InvalidRequest(_)));

        gui.activated.store(true, Ordering::SeqCst);
        let err = gui.call(&ui, "close", Value::Null).await.unwrap_err();
        assert!(matches!(err, KeelError::InvalidParams(_)));
        let reply = gui.call(&ui, "open", json!(1)).await.unwrap();
        assert_eq!(reply["caller"], "ui");
    }

    #[test]
    fn emitters_go_away_with_their_last_listener() {
        let journal = Journal::new();
        let gui = instance("gui", &journal);
        let first = gui.subscribe_event("opened", Arc::new(|_: &Value| {}));
        let second = gui.subscribe_event("opened", Arc::new(|_: &Value| {}));
        let targeted = gui.subscribe_targeted(&ComponentId::from("ui"), "progress", Arc::new(|_: &Value| {}));

        first.dispose();
        assert!(gui.events.lock().unwrap().contains_key("opened"));
        second.dispose();
        assert!(gui.events.lock().unwrap().is_empty());
        targeted.dispose();
        assert!(gui.targeted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deactivate_releases_resources_once() {
        let journal = Journal::new();
        let gui = instance("gui", &journal);
        gui.activated.store(true, Ordering::SeqCst);
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        gui.manage(Disposer::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        gui.deactivate_locked().await.unwrap();
        gui.deactivate_locked().await.unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(journal.count("gui.deactivate"), 1);
    }
}
