// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `keel launchers` and `keel inspect`.

use std::fmt::Write as _;
use std::path::Path;

use keel_config::KeelConfig;
use keel_core::{ContributionKind, KeelError};
use keel_protocol::ExtensionManifest;
use keel_runtime::Host;

/// Prints every launcher target the host would register.
pub fn run_launchers(config: KeelConfig) -> Result<(), KeelError> {
    let host = Host::new(config)?;
    for target in host.launchers().list() {
        println!("{target}");
    }
    Ok(())
}

/// Validates `<dir>/extension.json` and prints a summary of it.
pub fn run_inspect(dir: &Path) -> Result<(), KeelError> {
    let manifest = ExtensionManifest::load(dir)?;
    print!("{}", summarize(&manifest, dir));
    Ok(())
}

fn summarize(manifest: &ExtensionManifest, dir: &Path) -> String {
    let component = &manifest.component;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        component.name,
        component.version.as_deref().unwrap_or("(unversioned)")
    );
    let _ = writeln!(out, "  launcher:   {}", manifest.launcher.target);
    let _ = writeln!(
        out,
        "  executable: {}",
        manifest.executable_path(dir).display()
    );
    if !manifest.args.is_empty() {
        let _ = writeln!(out, "  args:       {}", manifest.args.join(" "));
    }
    for dependency in &component.dependencies {
        let _ = writeln!(
            out,
            "  depends on: {} {}",
            dependency.name,
            dependency.version.as_deref().unwrap_or("*")
        );
    }
    for kind in [
        ContributionKind::Method,
        ContributionKind::Notification,
        ContributionKind::Event,
        ContributionKind::Setting,
        ContributionKind::Interface,
    ] {
        let names: Vec<&str> = component.contributions.names(kind).collect();
        if !names.is_empty() {
            let _ = writeln!(out, "  {kind}s: {}", names.join(", "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_contributions() {
        let manifest = ExtensionManifest::from_json_str(
            r#"{
                "name": "files",
                "version": "0.3.0",
                "executable": "bin/files",
                "args": ["--stdio"],
                "dependencies": [{"name": "core", "version": "^0.1"}],
                "contributions": {
                    "methods": {"read": {}, "write": {}},
                    "events": {"changed": {}}
                }
            }"#,
        )
        .unwrap();
        let summary = summarize(&manifest, Path::new("/ext/files"));

        assert!(summary.starts_with("files 0.3.0\n"));
        assert!(summary.contains("  launcher:   none-none-none\n"));
        assert!(summary.contains("  executable: /ext/files/bin/files\n"));
        assert!(summary.contains("  args:       --stdio\n"));
        assert!(summary.contains("  depends on: core ^0.1\n"));
        assert!(summary.contains("  methods: read, write\n"));
        assert!(summary.contains("  events: changed\n"));
        assert!(!summary.contains("interfaces"));
    }

    #[test]
    fn inspect_reports_a_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(run_inspect(dir.path()), Err(KeelError::Io { .. })));
    }
}
