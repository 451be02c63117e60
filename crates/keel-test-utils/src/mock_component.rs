// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock in-process component for deterministic lifecycle tests.
//!
//! Every lifecycle step is written to a [`Journal`] as `<name>.<step>`, calls
//! are echoed back, and failures can be scripted per step.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use keel_core::{Caller, ComponentContext, ComponentImpl, EventSink, KeelError};

use crate::journal::Journal;

/// A component whose behaviour is configured up front.
pub struct MockComponent {
    name: String,
    journal: Journal,
    fail_initialize: bool,
    fail_activate: bool,
    fail_deactivate: bool,
    wait_for_cancel: bool,
    /// `(target, method, params)` called through the context while activating.
    activate_call: Option<(String, String, Value)>,
    context: Mutex<Option<Arc<dyn ComponentContext>>>,
    events: Mutex<Option<EventSink>>,
    settings: Mutex<Option<Value>>,
    callers: Mutex<Vec<Caller>>,
}

impl MockComponent {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            fail_initialize: false,
            fail_activate: false,
            fail_deactivate: false,
            wait_for_cancel: false,
            activate_call: None,
            context: Mutex::new(None),
            events: Mutex::new(None),
            settings: Mutex::new(None),
            callers: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_activate(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    pub fn failing_deactivate(mut self) -> Self {
        self.fail_deactivate = true;
        self
    }

    /// Activation only finishes when its cancellation token fires, and then
    /// fails with `Cancelled`.
    pub fn blocking_activate(mut self) -> Self {
        self.wait_for_cancel = true;
        self
    }

    /// Calls `target/method` from inside `activate`; a failed call fails the
    /// activation.
    pub fn calling_on_activate(mut self, target: &str, method: &str, params: Value) -> Self {
        self.activate_call = Some((target.to_string(), method.to_string(), params));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The context handed over by the last successful activation.
    pub fn context(&self) -> Arc<dyn ComponentContext> {
        self.context
            .lock()
            .unwrap()
            .clone()
            .expect("component has not been activated")
    }

    pub fn settings(&self) -> Option<Value> {
        self.settings.lock().unwrap().clone()
    }

    /// Emits one of this component's own events through the registry.
    pub fn emit(&self, event: &str, params: Value) {
        let sink = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("component has not been initialized");
        sink(event, params);
    }

    pub fn last_caller(&self) -> Caller {
        self.callers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("component has not been called")
    }

    fn step(&self, step: &str) {
        self.journal.record(format!("{}.{step}", self.name));
    }

    fn scripted_failure(&self, step: &str) -> KeelError {
        KeelError::Internal(format!("{} failed to {step}", self.name))
    }
}

#[async_trait]
impl ComponentImpl for MockComponent {
    async fn initialize(&self, events: EventSink) -> Result<(), KeelError> {
        self.step("initialize");
        if self.fail_initialize {
            return Err(self.scripted_failure("initialize"));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn activate(
        &self,
        context: Arc<dyn ComponentContext>,
        settings: Value,
        cancel: CancellationToken,
    ) -> Result<(), KeelError> {
        self.step("activate");
        if self.wait_for_cancel {
            cancel.cancelled().await;
            return Err(KeelError::Cancelled(format!("{} activation", self.name)));
        }
        if self.fail_activate {
            return Err(self.scripted_failure("activate"));
        }
        if let Some((target, method, params)) = &self.activate_call {
            context.call(target, method, params.clone()).await?;
        }
        *self.context.lock().unwrap() = Some(context);
        *self.settings.lock().unwrap() = Some(settings);
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), KeelError> {
        self.step("deactivate");
        self.context.lock().unwrap().take();
        if self.fail_deactivate {
            return Err(self.scripted_failure("deactivate"));
        }
        Ok(())
    }

    async fn call(&self, caller: Caller, method: &str, params: Value) -> Result<Value, KeelError> {
        self.step(&format!("call {method}"));
        let reply = json!({
            "component": self.name,
            "caller": caller.id().as_str(),
            "method": method,
            "params": params,
        });
        self.callers.lock().unwrap().push(caller);
        Ok(reply)
    }

    async fn notify(
        &self,
        caller: Caller,
        notification: &str,
        _params: Value,
    ) -> Result<(), KeelError> {
        self.step(&format!("notify {notification}"));
        self.callers.lock().unwrap().push(caller);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), KeelError> {
        self.step("dispose");
        self.events.lock().unwrap().take();
        Ok(())
    }
}
