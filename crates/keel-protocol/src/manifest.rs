// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `extension.json`: a component manifest plus how to launch it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_core::{ComponentManifest, KeelError};
use keel_launcher::Target;

pub const MANIFEST_FILE: &str = "extension.json";

/// Which launcher starts the extension, and what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherSpec {
    #[serde(rename = "type", default = "Target::native")]
    pub target: Target,
    #[serde(default)]
    pub requirements: Value,
}

impl Default for LauncherSpec {
    fn default() -> Self {
        Self {
            target: Target::native(),
            requirements: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    #[serde(flatten)]
    pub component: ComponentManifest,
    /// Relative to the extension directory, or an inline module key.
    pub executable: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default)]
    pub launcher: LauncherSpec,
}

impl ExtensionManifest {
    pub fn from_json_str(json: &str) -> Result<Self, KeelError> {
        let manifest: ExtensionManifest = serde_json::from_str(json)
            .map_err(|e| KeelError::Config(format!("invalid extension manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads `<dir>/extension.json`.
    pub fn load(dir: &Path) -> Result<Self, KeelError> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path)
            .map_err(|e| KeelError::io(format!("reading {}", path.display()), e))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), KeelError> {
        self.component.validate()?;
        if self.executable.trim().is_empty() {
            return Err(KeelError::Config(format!(
                "extension '{}': executable must not be empty",
                self.component.name
            )));
        }
        Ok(())
    }

    /// The path handed to the launcher. Inline modules are looked up by the
    /// bare executable key; everything else lives under `dir`.
    pub fn executable_path(&self, dir: &Path) -> PathBuf {
        if self.launcher.target == Target::inline() {
            PathBuf::from(&self.executable)
        } else {
            dir.join(&self.executable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_launcher_section() {
        let manifest = ExtensionManifest::from_json_str(
            r#"{
                "name": "gui",
                "version": "0.3.0",
                "executable": "bin/gui",
                "args": ["--stdio"],
                "launcher": {"type": "elf-x86_64-linux", "requirements": {"glibc": "2.31"}},
                "contributions": {"methods": {"open": {}}}
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.component.name, "gui");
        assert_eq!(manifest.args, vec!["--stdio"]);
        assert_eq!(manifest.launcher.target.to_string(), "elf-x86_64-linux");
        assert_eq!(
            manifest.executable_path(Path::new("/ext/gui")),
            PathBuf::from("/ext/gui/bin/gui")
        );
    }

    #[test]
    fn launcher_defaults_to_native() {
        let manifest =
            ExtensionManifest::from_json_str(r#"{"name": "tool", "executable": "tool"}"#).unwrap();
        assert_eq!(manifest.launcher.target, Target::native());
        assert_eq!(manifest.launcher.requirements, Value::Null);
    }

    #[test]
    fn inline_executables_are_module_keys() {
        let manifest = ExtensionManifest::from_json_str(
            r#"{"name": "echo", "executable": "builtin/echo", "launcher": {"type": "host-any-inline"}}"#,
        )
        .unwrap();
        assert_eq!(
            manifest.executable_path(Path::new("/ext/echo")),
            PathBuf::from("builtin/echo")
        );
    }

    #[test]
    fn rejects_invalid_manifests() {
        for json in [
            r#"{"name": "x"}"#,
            r#"{"name": "x", "executable": " "}"#,
            r#"{"name": "a/b", "executable": "x"}"#,
            r#"{"name": "x", "executable": "x", "launcher": {"type": "two-parts"}}"#,
        ] {
            assert!(
                matches!(ExtensionManifest::from_json_str(json), Err(KeelError::Config(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn load_reads_the_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "disk", "executable": "run.sh"}"#,
        )
        .unwrap();
        let manifest = ExtensionManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.component.name, "disk");

        let missing = ExtensionManifest::load(&dir.path().join("nowhere")).unwrap_err();
        assert!(matches!(missing, KeelError::Io { .. }));
    }
}
