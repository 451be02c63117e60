// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface objects: owner-tracked handles created by components against
//! interfaces other components declare.
//!
//! Interfaces are registered as `<component>/<interface>` while their
//! declaring component is active. An object lives until its owner destroys
//! it, the owner deactivates, or its interface goes away.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Value, json};
use tracing::{debug, warn};

use keel_core::{ComponentId, Emitter, KeelError, ObjectId, Subscription};

use crate::instance::{ComponentInstance, DEACTIVATE_EVENT};

/// Event emitted whenever an object is created.
pub const OBJECT_CREATED_EVENT: &str = "objectCreated";

struct ObjectEntry {
    owner_id: ComponentId,
    owner: Weak<ComponentInstance>,
    name: String,
    interface: String,
    close: Subscription,
}

struct InterfaceEntry {
    provider_id: ComponentId,
    provider: Weak<ComponentInstance>,
    objects: BTreeSet<ObjectId>,
}

#[derive(Default)]
struct ObjectTable {
    next_id: u64,
    objects: HashMap<ObjectId, ObjectEntry>,
    interfaces: HashMap<String, InterfaceEntry>,
}

impl ObjectTable {
    fn remove(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        let entry = self.objects.remove(&id)?;
        if let Some(interface) = self.interfaces.get_mut(&entry.interface) {
            interface.objects.remove(&id);
        }
        Some(entry)
    }

    fn interface(&self, name: &str) -> Result<&InterfaceEntry, KeelError> {
        self.interfaces
            .get(name)
            .ok_or_else(|| KeelError::InvalidParams(format!("unknown interface '{name}'")))
    }

    fn object(&self, id: ObjectId) -> Result<&ObjectEntry, KeelError> {
        self.objects
            .get(&id)
            .ok_or_else(|| KeelError::InvalidParams(format!("unknown object {id}")))
    }
}

/// Snapshot of one live object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub owner: ComponentId,
    pub name: String,
    pub interface: String,
}

pub struct ObjectRegistry {
    table: Arc<Mutex<ObjectTable>>,
    created: Emitter<Value>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ObjectTable::default())),
            created: Emitter::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ObjectTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register_interface(&self, name: String, provider: &Arc<ComponentInstance>) {
        let mut table = self.lock();
        if let Some(existing) = table.interfaces.get(&name) {
            warn!(interface = %name, provider = %existing.provider_id, "interface already registered");
            return;
        }
        debug!(interface = %name, provider = %provider.id(), "interface registered");
        table.interfaces.insert(
            name,
            InterfaceEntry {
                provider_id: provider.id().clone(),
                provider: Arc::downgrade(provider),
                objects: BTreeSet::new(),
            },
        );
    }

    /// Drops every interface `provider` registered along with its objects.
    /// Each owner is told which of its objects went away.
    pub(crate) async fn unregister_interfaces_of(&self, provider: &ComponentId) {
        let mut dropped = Vec::new();
        {
            let mut table = self.lock();
            let names: Vec<String> = table
                .interfaces
                .iter()
                .filter(|(_, entry)| &entry.provider_id == provider)
                .map(|(name, _)| name.clone())
                .collect();
            for name in names {
                let Some(interface) = table.interfaces.remove(&name) else {
                    continue;
                };
                for id in interface.objects {
                    if let Some(entry) = table.objects.remove(&id) {
                        dropped.push((id, entry, interface.provider.clone()));
                    }
                }
                debug!(interface = %name, "interface unregistered");
            }
        }

        for (id, entry, provider) in dropped {
            entry.close.dispose();
            let (Some(owner), Some(provider)) = (entry.owner.upgrade(), provider.upgrade()) else {
                continue;
            };
            if let Err(e) = owner.object_destroyed(&provider, id, &entry.interface).await {
                debug!(object = %id, owner = %entry.owner_id, error = %e, "owner rejected object destroy notice");
            }
        }
    }

    /// Releases every object `owner` holds without notifying anyone. Used when
    /// an activation fails before the owner's close hook could ever fire.
    pub(crate) fn drop_objects_owned_by(&self, owner: &ComponentId) {
        let dropped: Vec<ObjectEntry> = {
            let mut table = self.lock();
            let ids: Vec<ObjectId> = table
                .objects
                .iter()
                .filter(|(_, entry)| &entry.owner_id == owner)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| table.remove(id)).collect()
        };
        for entry in dropped {
            entry.close.dispose();
        }
    }

    pub fn has_interface(&self, name: &str) -> bool {
        self.lock().interfaces.contains_key(name)
    }

    /// Registered interface names, sorted.
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().interfaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates an object owned by `owner`. It is destroyed automatically when
    /// the owner deactivates.
    pub fn create_object(
        &self,
        owner: &Arc<ComponentInstance>,
        name: &str,
        interface: &str,
    ) -> Result<ObjectId, KeelError> {
        let id = {
            let mut table = self.lock();
            table.interface(interface)?;
            table.next_id += 1;
            ObjectId(table.next_id)
        };

        let weak_table = Arc::downgrade(&self.table);
        let close = owner.subscribe_event(
            DEACTIVATE_EVENT,
            Arc::new(move |_: &Value| {
                let Some(table) = weak_table.upgrade() else {
                    return;
                };
                let removed = table
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(id);
                if let Some(entry) = removed {
                    debug!(object = %id, owner = %entry.owner_id, "object released with its owner");
                    entry.close.dispose();
                }
            }),
        );

        {
            let mut table = self.lock();
            // The interface may have gone away while the lock was released.
            let attached = table
                .interfaces
                .get_mut(interface)
                .map(|entry| entry.objects.insert(id))
                .is_some();
            if !attached {
                drop(table);
                close.dispose();
                return Err(KeelError::InvalidParams(format!(
                    "unknown interface '{interface}'"
                )));
            }
            table.objects.insert(
                id,
                ObjectEntry {
                    owner_id: owner.id().clone(),
                    owner: Arc::downgrade(owner),
                    name: name.to_string(),
                    interface: interface.to_string(),
                    close,
                },
            );
        }

        debug!(object = %id, owner = %owner.id(), interface, name, "object created");
        self.created
            .emit(&json!({"interface": interface, "object": id}));
        Ok(id)
    }

    /// Destroys an object. Unknown ids are ignored; only the owner may
    /// destroy an object.
    pub fn destroy_object(&self, caller: &ComponentId, id: ObjectId) -> Result<(), KeelError> {
        let removed = {
            let mut table = self.lock();
            match table.objects.get(&id) {
                None => return Ok(()),
                Some(entry) if &entry.owner_id != caller => {
                    return Err(KeelError::InvalidRequest(format!(
                        "object {id} is owned by '{}', not '{caller}'",
                        entry.owner_id
                    )));
                }
                Some(_) => table.remove(id),
            }
        };
        if let Some(entry) = removed {
            entry.close.dispose();
            debug!(object = %id, owner = %caller, "object destroyed");
        }
        Ok(())
    }

    pub fn find_object(&self, interface: &str, name: &str) -> Result<ObjectId, KeelError> {
        let table = self.lock();
        table
            .interface(interface)?
            .objects
            .iter()
            .copied()
            .find(|id| table.objects.get(id).is_some_and(|entry| entry.name == name))
            .ok_or_else(|| {
                KeelError::InvalidParams(format!("no object '{name}' implements '{interface}'"))
            })
    }

    /// Ids of every object of `interface`, ascending.
    pub fn object_list(&self, interface: &str) -> Result<Vec<ObjectId>, KeelError> {
        Ok(self
            .lock()
            .interface(interface)?
            .objects
            .iter()
            .copied()
            .collect())
    }

    pub fn object_name(&self, id: ObjectId) -> Result<String, KeelError> {
        Ok(self.lock().object(id)?.name.clone())
    }

    pub fn object_info(&self, id: ObjectId) -> Result<ObjectInfo, KeelError> {
        let table = self.lock();
        let entry = table.object(id)?;
        Ok(ObjectInfo {
            id,
            owner: entry.owner_id.clone(),
            name: entry.name.clone(),
            interface: entry.interface.clone(),
        })
    }

    fn owner_of(&self, id: ObjectId) -> Result<Arc<ComponentInstance>, KeelError> {
        let table = self.lock();
        let entry = table.object(id)?;
        entry.owner.upgrade().ok_or_else(|| {
            KeelError::InvalidRequest(format!("owner '{}' of object {id} is gone", entry.owner_id))
        })
    }

    /// Forwards an object-scoped call to the object's owner.
    pub(crate) async fn call(
        &self,
        caller: &ComponentInstance,
        id: ObjectId,
        method: &str,
        params: Value,
    ) -> Result<Value, KeelError> {
        let owner = self.owner_of(id)?;
        owner.object_call(caller, id, method, params).await
    }

    pub(crate) async fn notify(
        &self,
        caller: &ComponentInstance,
        id: ObjectId,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        let owner = self.owner_of(id)?;
        owner.object_notify(caller, id, notification, params).await
    }

    /// Listens for `objectCreated` payloads `{interface, object}`.
    pub fn on_object_created(
        &self,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.created.subscribe(listener)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.lock();
        f.debug_struct("ObjectRegistry")
            .field("objects", &table.objects.len())
            .field("interfaces", &table.interfaces.len())
            .finish()
    }
}
