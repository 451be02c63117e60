// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launcher target descriptors.
//!
//! A target is a `file_format-arch-platform` triple such as
//! `elf-x86_64-linux`. Three synthetic triples name the built-in launchers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use keel_core::KeelError;

/// `{file_format, arch, platform}` lookup key of the launcher registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub file_format: String,
    pub arch: String,
    pub platform: String,
}

impl Target {
    pub fn new(
        file_format: impl Into<String>,
        arch: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            file_format: file_format.into(),
            arch: arch.into(),
            platform: platform.into(),
        }
    }

    /// A native executable started directly by the operating system.
    pub fn native() -> Self {
        Self::new("none", "none", "none")
    }

    /// A child process running the same runtime as the host.
    pub fn child_runtime() -> Self {
        Self::new("host", "any", "child")
    }

    /// A module loaded into the host process.
    pub fn inline() -> Self {
        Self::new("host", "any", "inline")
    }

    /// Parses a dash-joined triple. Exactly three non-empty parts are required.
    pub fn parse(triple: &str) -> Result<Self, KeelError> {
        let parts: Vec<&str> = triple.split('-').collect();
        match parts.as_slice() {
            [file_format, arch, platform]
                if !file_format.is_empty() && !arch.is_empty() && !platform.is_empty() =>
            {
                Ok(Self::new(*file_format, *arch, *platform))
            }
            _ => Err(KeelError::InvalidParams(format!(
                "invalid launcher target '{triple}': expected <file_format>-<arch>-<platform>"
            ))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.file_format, self.arch, self.platform)
    }
}

impl FromStr for Target {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let triple = String::deserialize(deserializer)?;
        Target::parse(&triple).map_err(serde::de::Error::custom)
    }
}
