// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry lifecycle: dependency order, idempotence, rollback, gating and
//! event routing, driven through mock in-process components.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use keel_core::{ComponentId, ComponentManifest, ContributionKind, KeelError};
use keel_runtime::ComponentRegistry;
use keel_test_utils::{Journal, MockComponent};

fn id(name: &str) -> ComponentId {
    ComponentId::from(name)
}

fn register(
    registry: &ComponentRegistry,
    manifest: ComponentManifest,
    mock: MockComponent,
) -> Arc<MockComponent> {
    let mock = mock.build();
    registry.register_component(manifest, mock.clone()).unwrap();
    mock
}

fn counter() -> (Arc<AtomicUsize>, keel_core::EventListener) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);
    let listener: keel_core::EventListener = Arc::new(move |_: &Value| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    (hits, listener)
}

#[tokio::test]
async fn dependencies_activate_first() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(&registry, ComponentManifest::named("core"), MockComponent::new("core", &journal));
    register(
        &registry,
        ComponentManifest::named("gui").with_dependency("core"),
        MockComponent::new("gui", &journal),
    );

    registry.activate_component(&id("gui")).await.unwrap();

    assert_eq!(journal.matching(".activate"), vec!["core.activate", "gui.activate"]);
    assert_eq!(registry.activated_list(), vec![id("core"), id("gui")]);
}

#[tokio::test]
async fn activating_twice_runs_side_effects_once() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(&registry, ComponentManifest::named("gui"), MockComponent::new("gui", &journal));

    registry.activate_component(&id("gui")).await.unwrap();
    registry.activate_component(&id("gui")).await.unwrap();

    assert_eq!(journal.count("gui.initialize"), 1);
    assert_eq!(journal.count("gui.activate"), 1);
}

#[tokio::test]
async fn self_dependency_is_skipped() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("loop").with_dependency("loop"),
        MockComponent::new("loop", &journal),
    );
    registry.activate_component(&id("loop")).await.unwrap();
    assert_eq!(journal.count("loop.activate"), 1);
}

#[tokio::test]
async fn failing_dependency_aborts_the_dependent() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("core"),
        MockComponent::new("core", &journal).failing_activate(),
    );
    register(
        &registry,
        ComponentManifest::named("gui").with_dependency("core"),
        MockComponent::new("gui", &journal),
    );

    let err = registry.activate_component(&id("gui")).await.unwrap_err();
    assert!(matches!(err, KeelError::Internal(_)));
    assert_eq!(journal.count("gui.activate"), 0);
    assert!(!registry.find_component("gui", None).unwrap().is_activated());
    assert!(!registry.find_component("core", None).unwrap().is_activated());
    assert!(registry.activated_list().is_empty());

    // Not retried behind the caller's back, but a later explicit attempt runs again.
    let _ = registry.activate_component(&id("gui")).await;
    assert_eq!(journal.count("core.activate"), 2);
}

#[tokio::test]
async fn failing_initialize_leaves_component_uninitialized() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("gui"),
        MockComponent::new("gui", &journal).failing_initialize(),
    );

    assert!(registry.initialize_component(&id("gui")).await.is_err());
    let gui = registry.find_component("gui", None).unwrap();
    assert!(!gui.is_initialized());
    assert!(registry.activate_component(&id("gui")).await.is_err());
    assert_eq!(journal.count("gui.activate"), 0);
}

#[tokio::test]
async fn dependency_cycles_are_rejected() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("a").with_dependency("b"),
        MockComponent::new("a", &journal),
    );
    register(
        &registry,
        ComponentManifest::named("b").with_dependency("a"),
        MockComponent::new("b", &journal),
    );

    match registry.activate_component(&id("a")).await {
        Err(KeelError::InvalidRequest(message)) => assert!(message.contains("a -> b -> a")),
        other => panic!("expected a cycle error, got {other:?}"),
    }
    assert!(journal.matching(".activate").is_empty());
}

#[tokio::test]
async fn missing_dependency_is_an_invalid_request() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("gui").with_dependency("core"),
        MockComponent::new("gui", &journal),
    );
    let err = registry.activate_component(&id("gui")).await.unwrap_err();
    assert!(matches!(err, KeelError::InvalidRequest(_)));
}

#[tokio::test]
async fn names_are_unique_whatever_the_version() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("gui").with_version("1.0.0"),
        MockComponent::new("gui", &journal),
    );
    let err = registry
        .register_component(
            ComponentManifest::named("gui").with_version("2.0.0"),
            MockComponent::new("gui", &journal).build(),
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidRequest(_)));

    let found = registry.find_component("gui", Some("2.0.0")).unwrap();
    assert_eq!(found.manifest().version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn calls_are_gated_by_state_and_contributions() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("gui")
            .with_contribution(ContributionKind::Method, "open")
            .with_contribution(ContributionKind::Notification, "refresh"),
        MockComponent::new("gui", &journal),
    );
    let ui = register(&registry, ComponentManifest::named("ui"), MockComponent::new("ui", &journal));

    let err = registry
        .call(&id("ui"), &id("gui"), "open", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidRequest(_)));

    registry.startup().await;
    let err = registry
        .call(&id("ui"), &id("gui"), "close", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidParams(_)));
    let err = registry
        .notify(&id("ui"), &id("gui"), "open", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidParams(_)));
    let err = registry
        .call(&id("ui"), &id("nowhere"), "open", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, KeelError::MethodNotFound(_)));

    let reply = ui
        .context()
        .call("gui", "open", json!({"file": "a.txt"}))
        .await
        .unwrap();
    assert_eq!(reply["caller"], "ui");
    assert_eq!(reply["params"]["file"], "a.txt");
    ui.context().notify("gui", "refresh", Value::Null).await.unwrap();
    assert_eq!(journal.count("gui.notify refresh"), 1);
}

#[tokio::test]
async fn on_event_accepts_declared_and_lifecycle_events() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    let gui = register(
        &registry,
        ComponentManifest::named("gui").with_contribution(ContributionKind::Event, "opened"),
        MockComponent::new("gui", &journal),
    );
    register(&registry, ComponentManifest::named("ui"), MockComponent::new("ui", &journal));
    registry.activate_component(&id("ui")).await.unwrap();

    let (_, listener) = counter();
    let err = registry
        .on_event(&id("ui"), &id("gui"), "closed", listener)
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidParams(_)));

    let (activations, listener) = counter();
    registry
        .on_event(&id("ui"), &id("gui"), "activate", listener)
        .unwrap();
    let (opened, listener) = counter();
    registry
        .on_event(&id("ui"), &id("gui"), "opened", listener)
        .unwrap();

    registry.activate_component(&id("gui")).await.unwrap();
    gui.emit("opened", json!({"file": "a.txt"}));
    gui.emit("undeclared", Value::Null);
    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    // The subscriber's listeners go away with its activation.
    registry.deactivate_component(&id("ui")).await.unwrap();
    gui.emit("opened", Value::Null);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callee_can_send_an_event_to_one_caller() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    let gui = register(
        &registry,
        ComponentManifest::named("gui")
            .with_contribution(ContributionKind::Method, "open")
            .with_contribution(ContributionKind::Event, "progress"),
        MockComponent::new("gui", &journal),
    );
    let ui = register(&registry, ComponentManifest::named("ui"), MockComponent::new("ui", &journal));
    let other = register(&registry, ComponentManifest::named("other"), MockComponent::new("other", &journal));
    registry.startup().await;

    let (ui_hits, listener) = counter();
    ui.context().on_event("gui", "progress", listener).unwrap();
    let (other_hits, listener) = counter();
    other.context().on_event("gui", "progress", listener).unwrap();

    ui.context().call("gui", "open", Value::Null).await.unwrap();
    gui.last_caller().send_event("progress", json!(50));

    assert_eq!(ui_hits.load(Ordering::SeqCst), 1);
    assert_eq!(other_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn caller_close_hook_fires_on_caller_deactivate() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    let gui = register(
        &registry,
        ComponentManifest::named("gui").with_contribution(ContributionKind::Method, "open"),
        MockComponent::new("gui", &journal),
    );
    let ui = register(&registry, ComponentManifest::named("ui"), MockComponent::new("ui", &journal));
    registry.startup().await;

    ui.context().call("gui", "open", Value::Null).await.unwrap();
    let closed = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&closed);
    gui.last_caller()
        .on_close(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    registry.deactivate_component(&id("ui")).await.unwrap();
    registry.deactivate_component(&id("ui")).await.unwrap();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settings_defaults_reach_activate() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    let manifest = ComponentManifest::from_json_str(
        r#"{"name": "editor", "contributions": {"settings": {"theme": {"default": "dark"}}}}"#,
    )
    .unwrap();
    let editor = register(&registry, manifest, MockComponent::new("editor", &journal));

    registry.activate_component(&id("editor")).await.unwrap();
    assert_eq!(editor.settings(), Some(json!({"theme": "dark"})));
}

#[tokio::test]
async fn teardown_steps_are_safe_to_repeat() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(&registry, ComponentManifest::named("gui"), MockComponent::new("gui", &journal));
    registry.activate_component(&id("gui")).await.unwrap();

    registry.deactivate_component(&id("gui")).await.unwrap();
    registry.deactivate_component(&id("gui")).await.unwrap();
    registry.uninitialize_component(&id("gui")).await.unwrap();
    registry.uninitialize_component(&id("gui")).await.unwrap();
    registry.unregister_component(&id("gui")).await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["gui.initialize", "gui.activate", "gui.deactivate", "gui.dispose"]
    );
    assert!(registry.find_component("gui", None).is_none());
    assert!(matches!(
        registry.unregister_component(&id("gui")).await,
        Err(KeelError::InvalidParams(_))
    ));
}

#[tokio::test]
async fn failed_deactivate_still_leaves_component_inactive() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("gui"),
        MockComponent::new("gui", &journal).failing_deactivate(),
    );
    registry.activate_component(&id("gui")).await.unwrap();

    assert!(registry.deactivate_component(&id("gui")).await.is_err());
    assert!(!registry.find_component("gui", None).unwrap().is_activated());
    assert!(registry.activated_list().is_empty());
}

#[tokio::test]
async fn shutdown_deactivates_in_reverse_order() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(&registry, ComponentManifest::named("core"), MockComponent::new("core", &journal));
    register(
        &registry,
        ComponentManifest::named("gui").with_dependency("core"),
        MockComponent::new("gui", &journal),
    );
    let failures = registry.startup().await;
    assert!(failures.is_empty());

    registry.shutdown().await.unwrap();
    assert_eq!(
        journal.matching(".deactivate"),
        vec!["gui.deactivate", "core.deactivate"]
    );
    assert_eq!(journal.matching(".dispose").len(), 2);
    assert!(registry.is_shutting_down());
}

#[tokio::test]
async fn startup_isolates_failures() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("broken"),
        MockComponent::new("broken", &journal).failing_activate(),
    );
    register(&registry, ComponentManifest::named("fine"), MockComponent::new("fine", &journal));

    let failures = registry.startup().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, id("broken"));
    assert!(registry.find_component("fine", None).unwrap().is_activated());
}

#[tokio::test]
async fn shutdown_cancels_a_pending_activation() {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    register(
        &registry,
        ComponentManifest::named("slow"),
        MockComponent::new("slow", &journal).blocking_activate(),
    );

    let activating = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.activate_component(&ComponentId::from("slow")).await })
    };
    while journal.count("slow.activate") == 0 {
        tokio::task::yield_now().await;
    }

    registry.shutdown().await.unwrap();
    let outcome = activating.await.unwrap();
    assert!(matches!(outcome, Err(KeelError::Cancelled(_))));
    assert_eq!(journal.count("slow.dispose"), 1);
}
