// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the keel host.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key is an
//! error at startup rather than a silently ignored setting.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level keel configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    /// Host identity and logging.
    #[serde(default)]
    pub host: HostConfig,

    /// Where extensions live and which ones load at startup.
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    /// Extension protocol tuning.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Built-in launcher settings.
    #[serde(default)]
    pub launchers: LaunchersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Name the host reports to extensions during the handshake.
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_host_name() -> String {
    "keel".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionsConfig {
    /// Directory holding one sub-directory per extension, each with an
    /// `extension.json`.
    #[serde(default = "default_extensions_dir")]
    pub directory: PathBuf,

    /// Extension ids loaded and activated by `startup`.
    #[serde(default)]
    pub autoload: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            directory: default_extensions_dir(),
            autoload: Vec::new(),
        }
    }
}

fn default_extensions_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("keel").join("extensions"))
        .unwrap_or_else(|| PathBuf::from("./extensions"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Deadline applied to every request sent to an extension.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ProtocolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchersConfig {
    /// Program used by the child-runtime launcher. The launcher is only
    /// registered when this is set.
    #[serde(default)]
    pub child_runtime: Option<PathBuf>,

    /// Arguments placed before the extension path on the child-runtime
    /// command line.
    #[serde(default)]
    pub child_runtime_args: Vec<String>,

    /// Capacity in bytes of each in-memory pipe used by inline modules.
    #[serde(default = "default_inline_buffer_size")]
    pub inline_buffer_size: usize,
}

impl Default for LaunchersConfig {
    fn default() -> Self {
        Self {
            child_runtime: None,
            child_runtime_args: Vec::new(),
            inline_buffer_size: default_inline_buffer_size(),
        }
    }
}

fn default_inline_buffer_size() -> usize {
    64 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = KeelConfig::default();
        assert_eq!(config.host.name, "keel");
        assert_eq!(config.protocol.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.launchers.inline_buffer_size, 65536);
        assert!(config.extensions.autoload.is_empty());
        assert!(config.extensions.directory.ends_with("extensions"));
    }
}
