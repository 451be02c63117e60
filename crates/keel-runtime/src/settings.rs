// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings handed to components on activation.

use serde_json::{Map, Value};

use keel_core::{ComponentManifest, ContributionKind};

/// Supplies the settings object a component is activated with.
pub trait SettingsStore: Send + Sync {
    fn settings_for(&self, manifest: &ComponentManifest) -> Value;
}

/// Uses the `default` of every declared setting. Settings without a default
/// are omitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaDefaults;

impl SettingsStore for SchemaDefaults {
    fn settings_for(&self, manifest: &ComponentManifest) -> Value {
        let settings: Map<String, Value> = manifest
            .contributions
            .table(ContributionKind::Setting)
            .iter()
            .filter_map(|(name, schema)| {
                schema
                    .default_value()
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        Value::Object(settings)
    }
}
