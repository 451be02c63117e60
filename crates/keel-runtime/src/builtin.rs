// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The built-in `core` component.
//!
//! Exposes the registry and the object registry as ordinary contract methods,
//! so extensions reach them over the wire as `core/<method>`.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use keel_core::{
    Caller, ComponentContext, ComponentId, ComponentImpl, ComponentManifest, ContributionKind,
    EventSink, KeelError, ObjectId,
};

use crate::host::Host;
use crate::instance::ComponentInstance;
use crate::objects::OBJECT_CREATED_EVENT;

/// Name the built-in component registers under.
pub const CORE_COMPONENT: &str = "core";

const METHODS: &[&str] = &[
    "activateComponent",
    "deactivateComponent",
    "loadExtension",
    "unloadExtension",
    "getComponentList",
    "createObject",
    "destroyObject",
    "findObject",
    "getObjectList",
    "getObjectName",
    "objectCall",
];

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Deserialize)]
struct PathParams {
    path: PathBuf,
}

#[derive(Deserialize)]
struct CreateObjectParams {
    name: String,
    interface: String,
}

#[derive(Debug, Deserialize)]
struct ObjectParams {
    object: ObjectId,
}

#[derive(Deserialize)]
struct FindObjectParams {
    interface: String,
    name: String,
}

#[derive(Deserialize)]
struct InterfaceParams {
    interface: String,
}

#[derive(Deserialize)]
struct ObjectCallParams {
    object: ObjectId,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct ObjectNotifyParams {
    object: ObjectId,
    notification: String,
    #[serde(default)]
    params: Value,
}

fn parse<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, KeelError> {
    serde_json::from_value(params)
        .map_err(|e| KeelError::InvalidParams(format!("core.{method}: {e}")))
}

pub struct CoreComponent {
    host: Weak<Host>,
}

impl CoreComponent {
    pub fn new(host: Weak<Host>) -> Self {
        Self { host }
    }

    pub fn manifest() -> ComponentManifest {
        let manifest = ComponentManifest::named(CORE_COMPONENT)
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_contribution(ContributionKind::Notification, "objectNotify")
            .with_contribution(ContributionKind::Event, OBJECT_CREATED_EVENT);
        METHODS.iter().fold(manifest, |manifest, method| {
            manifest.with_contribution(ContributionKind::Method, *method)
        })
    }

    fn host(&self) -> Result<Arc<Host>, KeelError> {
        self.host
            .upgrade()
            .ok_or_else(|| KeelError::Cancelled("host is shutting down".to_string()))
    }

    fn caller_instance(host: &Host, caller: &Caller) -> Result<Arc<ComponentInstance>, KeelError> {
        host.registry()
            .find_component_by_id(caller.id())
            .ok_or_else(|| KeelError::InvalidRequest(format!("unknown caller '{}'", caller.id())))
    }
}

#[async_trait]
impl ComponentImpl for CoreComponent {
    async fn initialize(&self, _events: EventSink) -> Result<(), KeelError> {
        Ok(())
    }

    async fn activate(
        &self,
        context: Arc<dyn ComponentContext>,
        _settings: Value,
        _cancel: CancellationToken,
    ) -> Result<(), KeelError> {
        let host = self.host()?;
        let events = Arc::clone(&context);
        let bridge = host
            .registry()
            .objects()
            .on_object_created(move |payload| events.emit_event(OBJECT_CREATED_EVENT, payload.clone()));
        context.manage(bridge.into());
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), KeelError> {
        Ok(())
    }

    async fn call(&self, caller: Caller, method: &str, params: Value) -> Result<Value, KeelError> {
        let host = self.host()?;
        let registry = host.registry();
        let objects = registry.objects();
        match method {
            "activateComponent" => {
                let NameParams { name } = parse(method, params)?;
                registry.activate_component(&ComponentId::new(name)).await?;
                Ok(Value::Bool(true))
            }
            "deactivateComponent" => {
                let NameParams { name } = parse(method, params)?;
                registry.deactivate_component(&ComponentId::new(name)).await?;
                Ok(Value::Null)
            }
            "loadExtension" => {
                let PathParams { path } = parse(method, params)?;
                let id = host.load_extension(&path).await?;
                Ok(json!(id))
            }
            "unloadExtension" => {
                let NameParams { name } = parse(method, params)?;
                host.unload_extension(&ComponentId::new(name)).await?;
                Ok(Value::Null)
            }
            "getComponentList" => {
                let list: Vec<Value> = registry
                    .component_list()
                    .into_iter()
                    .filter_map(|id| registry.find_component_by_id(&id))
                    .map(|instance| {
                        json!({
                            "name": instance.id(),
                            "version": instance.manifest().version,
                            "activated": instance.is_activated(),
                        })
                    })
                    .collect();
                Ok(Value::Array(list))
            }
            "createObject" => {
                let CreateObjectParams { name, interface } = parse(method, params)?;
                let owner = Self::caller_instance(&host, &caller)?;
                Ok(json!(objects.create_object(&owner, &name, &interface)?))
            }
            "destroyObject" => {
                let ObjectParams { object } = parse(method, params)?;
                objects.destroy_object(caller.id(), object)?;
                Ok(Value::Null)
            }
            "findObject" => {
                let FindObjectParams { interface, name } = parse(method, params)?;
                Ok(json!(objects.find_object(&interface, &name)?))
            }
            "getObjectList" => {
                let InterfaceParams { interface } = parse(method, params)?;
                Ok(json!(objects.object_list(&interface)?))
            }
            "getObjectName" => {
                let ObjectParams { object } = parse(method, params)?;
                Ok(json!(objects.object_name(object)?))
            }
            "objectCall" => {
                let ObjectCallParams {
                    object,
                    method: object_method,
                    params,
                } = parse(method, params)?;
                let caller = Self::caller_instance(&host, &caller)?;
                objects.call(&caller, object, &object_method, params).await
            }
            other => Err(KeelError::MethodNotFound(format!("core: no method '{other}'"))),
        }
    }

    async fn notify(
        &self,
        caller: Caller,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        if notification != "objectNotify" {
            return Err(KeelError::MethodNotFound(format!(
                "core: no notification '{notification}'"
            )));
        }
        let host = self.host()?;
        let ObjectNotifyParams {
            object,
            notification,
            params,
        } = parse(notification, params)?;
        let caller = Self::caller_instance(&host, &caller)?;
        host.registry()
            .objects()
            .notify(&caller, object, &notification, params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_declares_every_method() {
        let manifest = CoreComponent::manifest();
        manifest.validate().unwrap();
        for method in METHODS {
            assert!(manifest.contributions.contains(ContributionKind::Method, method));
        }
        assert!(
            manifest
                .contributions
                .contains(ContributionKind::Event, "objectCreated")
        );
    }

    #[test]
    fn malformed_params_are_invalid() {
        let err = parse::<ObjectParams>("destroyObject", json!({"object": "x"})).unwrap_err();
        assert!(matches!(err, KeelError::InvalidParams(_)));
    }
}
