// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component manifests.
//!
//! A manifest names a component, lists the components it depends on, and
//! declares what it contributes: methods, notifications, events, settings,
//! and interfaces. Descriptors are opaque schemas; only their names matter to
//! the host. Manifests are validated once when parsed and are immutable after
//! registration.

use std::collections::BTreeMap;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::KeelError;
use crate::types::ComponentId;

/// The five kinds of contribution a component can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ContributionKind {
    Method,
    Notification,
    Event,
    Setting,
    Interface,
}

/// Descriptor attached to a contribution. Its structure is not interpreted
/// beyond an optional `default` for settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(pub Value);

impl Schema {
    /// The `default` value of a setting descriptor, if it declares one.
    pub fn default_value(&self) -> Option<&Value> {
        self.0.get("default")
    }
}

/// A single declared contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution<'a> {
    pub kind: ContributionKind,
    pub name: &'a str,
    pub schema: &'a Schema,
}

/// Everything a component declares it provides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contributions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notifications: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub interfaces: BTreeMap<String, Schema>,
}

impl Contributions {
    pub fn table(&self, kind: ContributionKind) -> &BTreeMap<String, Schema> {
        match kind {
            ContributionKind::Method => &self.methods,
            ContributionKind::Notification => &self.notifications,
            ContributionKind::Event => &self.events,
            ContributionKind::Setting => &self.settings,
            ContributionKind::Interface => &self.interfaces,
        }
    }

    pub fn contains(&self, kind: ContributionKind, name: &str) -> bool {
        self.table(kind).contains_key(name)
    }

    pub fn schema(&self, kind: ContributionKind, name: &str) -> Option<&Schema> {
        self.table(kind).get(name)
    }

    pub fn names(&self, kind: ContributionKind) -> impl Iterator<Item = &str> {
        self.table(kind).keys().map(String::as_str)
    }

    /// All contributions, grouped by kind.
    pub fn iter(&self) -> impl Iterator<Item = Contribution<'_>> {
        [
            ContributionKind::Method,
            ContributionKind::Notification,
            ContributionKind::Event,
            ContributionKind::Setting,
            ContributionKind::Interface,
        ]
        .into_iter()
        .flat_map(move |kind| {
            self.table(kind).iter().map(move |(name, schema)| Contribution {
                kind,
                name,
                schema,
            })
        })
    }
}

/// A declared dependency on another component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Dependency {
    pub fn id(&self) -> ComponentId {
        ComponentId::new(self.name.clone())
    }

    /// Whether `version` satisfies this dependency's requirement.
    ///
    /// A dependency without a requirement, or a component without a version,
    /// always matches.
    pub fn accepts(&self, version: Option<&str>) -> bool {
        let (Some(requirement), Some(version)) = (self.version.as_deref(), version) else {
            return true;
        };
        match (VersionReq::parse(requirement), Version::parse(version)) {
            (Ok(requirement), Ok(version)) => requirement.matches(&version),
            _ => false,
        }
    }
}

/// Identity and capability declaration of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub contributions: Contributions,
}

impl ComponentManifest {
    /// Creates an empty manifest with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            dependencies: Vec::new(),
            contributions: Contributions::default(),
        }
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(self.name.clone())
    }

    /// Parses and validates a manifest from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, KeelError> {
        let manifest: ComponentManifest = serde_json::from_str(json)
            .map_err(|e| KeelError::Config(format!("invalid component manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks the invariants the registry relies on.
    pub fn validate(&self) -> Result<(), KeelError> {
        if self.name.trim().is_empty() {
            return Err(KeelError::Config(
                "component manifest: name must not be empty".to_string(),
            ));
        }
        if self.name.contains('/') {
            return Err(KeelError::Config(format!(
                "component manifest: name '{}' must not contain '/'",
                self.name
            )));
        }
        if let Some(version) = &self.version {
            Version::parse(version).map_err(|e| {
                KeelError::Config(format!(
                    "component manifest '{}': invalid version '{version}': {e}",
                    self.name
                ))
            })?;
        }
        for dependency in &self.dependencies {
            if dependency.name.trim().is_empty() {
                return Err(KeelError::Config(format!(
                    "component manifest '{}': dependency name must not be empty",
                    self.name
                )));
            }
            if let Some(requirement) = &dependency.version {
                VersionReq::parse(requirement).map_err(|e| {
                    KeelError::Config(format!(
                        "component manifest '{}': invalid version requirement '{requirement}' for '{}': {e}",
                        self.name, dependency.name
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Builder-style helper used by in-process components.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            version: None,
        });
        self
    }

    pub fn with_contribution(mut self, kind: ContributionKind, name: impl Into<String>) -> Self {
        let table = match kind {
            ContributionKind::Method => &mut self.contributions.methods,
            ContributionKind::Notification => &mut self.contributions.notifications,
            ContributionKind::Event => &mut self.contributions.events,
            ContributionKind::Setting => &mut self.contributions.settings,
            ContributionKind::Interface => &mut self.contributions.interfaces,
        };
        table.insert(name.into(), Schema::default());
        self
    }
}
