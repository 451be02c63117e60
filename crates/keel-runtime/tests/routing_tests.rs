// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An extension proxy wired into the registry, with a scripted peer on the
//! other end of the pipes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use keel_core::{ComponentId, ComponentManifest, ContributionKind, Dispatcher, ErrorCode};
use keel_protocol::testing::{ScriptedPeer, pipe};
use keel_protocol::{Extension, ExtensionManifest, ExtensionOptions, Message, methods};
use keel_runtime::ComponentRegistry;
use keel_test_utils::{Journal, MockComponent};

async fn setup() -> (Arc<ComponentRegistry>, Arc<MockComponent>, ScriptedPeer) {
    let journal = Journal::new();
    let registry = ComponentRegistry::new();
    let gui = MockComponent::new("gui", &journal).build();
    registry
        .register_component(
            ComponentManifest::named("gui").with_contribution(ContributionKind::Method, "open"),
            gui.clone(),
        )
        .unwrap();
    registry
        .activate_component(&ComponentId::from("gui"))
        .await
        .unwrap();

    let manifest = ExtensionManifest::from_json_str(
        r#"{
            "name": "ext",
            "version": "1.0.0",
            "executable": "bin/ext",
            "contributions": {"events": {"changed": {}}}
        }"#,
    )
    .unwrap();
    let (handle, peer) = pipe();
    let weak: Weak<ComponentRegistry> = Arc::downgrade(&registry);
    let dispatcher: Weak<dyn Dispatcher> = weak;
    let extension = Extension::spawn(
        manifest.clone(),
        handle,
        dispatcher,
        ExtensionOptions::default(),
    );
    registry
        .register_component(manifest.component, extension)
        .unwrap();
    (registry, gui, peer)
}

#[tokio::test]
async fn inbound_requests_run_as_the_extension() {
    let (_registry, _gui, mut peer) = setup().await;

    peer.send(Message::request(1, "gui/open", json!({"file": "a.txt"})))
        .await;
    let reply = peer.expect_response(1).await.unwrap();
    assert_eq!(reply["caller"], "ext");
    assert_eq!(reply["params"]["file"], "a.txt");

    peer.send(Message::request(2, "gui/close", Value::Null)).await;
    let error = peer.expect_response(2).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidParams.as_i64());

    peer.send(Message::request(3, "nobody/open", Value::Null)).await;
    let error = peer.expect_response(3).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::MethodNotFound.as_i64());
}

#[tokio::test]
async fn activation_handshake_and_extension_events() {
    let (registry, gui, mut peer) = setup().await;

    let activating = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.activate_component(&ComponentId::from("ext")).await })
    };
    let init = peer.answer_initialize("ext", Some("1.0.0")).await;
    assert_eq!(init["client"]["name"], "keel");
    let activate = peer.acknowledge(methods::ACTIVATE).await;
    assert_eq!(activate, json!({"settings": {}}));
    activating.await.unwrap().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    gui.context()
        .on_event(
            "ext",
            "changed",
            Arc::new(move |payload: &Value| {
                let _ = tx.send(payload.clone());
            }),
        )
        .unwrap();

    peer.send(Message::notification(
        methods::EVENT,
        json!({"event": "changed", "params": {"n": 1}}),
    ))
    .await;
    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event not delivered")
        .unwrap();
    assert_eq!(payload, json!({"n": 1}));
}

#[tokio::test]
async fn failed_inbound_notification_is_reported_without_an_id() {
    let (_registry, _gui, mut peer) = setup().await;

    peer.send(Message::notification("gui/refresh", Value::Null))
        .await;
    match peer.next_message_within(Duration::from_secs(5)).await {
        Some(Message::Error { id: None, error }) => {
            assert_eq!(error.code, ErrorCode::InvalidParams.as_i64());
        }
        other => panic!("expected an id-less error, got {other:?}"),
    }
}
