// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization checks that serde attributes cannot express.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::KeelConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validates a deserialized configuration, collecting every problem rather
/// than stopping at the first.
pub fn validate_config(config: &KeelConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if config.host.name.trim().is_empty() {
        invalid("host.name must not be empty".to_string());
    }

    if !LOG_LEVELS.contains(&config.host.log_level.as_str()) {
        invalid(format!(
            "host.log_level `{}` is not one of {}",
            config.host.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.extensions.directory.as_os_str().is_empty() {
        invalid("extensions.directory must not be empty".to_string());
    }

    let mut seen = HashSet::new();
    for (i, id) in config.extensions.autoload.iter().enumerate() {
        if id.trim().is_empty() {
            invalid(format!("extensions.autoload[{i}] must not be empty"));
        } else if id.contains(['/', '\\']) || id == ".." {
            invalid(format!(
                "extensions.autoload[{i}] `{id}` must be an extension id, not a path"
            ));
        } else if !seen.insert(id.as_str()) {
            invalid(format!("extensions.autoload lists `{id}` more than once"));
        }
    }

    if config.protocol.request_timeout_ms == 0 {
        invalid("protocol.request_timeout_ms must be greater than 0".to_string());
    }

    if config.launchers.inline_buffer_size == 0 {
        invalid("launchers.inline_buffer_size must be greater than 0".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &KeelConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&KeelConfig::default()).is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = KeelConfig::default();
        config.protocol.request_timeout_ms = 0;
        let messages = messages(&config);
        assert!(messages.iter().any(|m| m.contains("request_timeout_ms")));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = KeelConfig::default();
        config.host.log_level = "verbose".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("verbose")));
    }

    #[test]
    fn autoload_entries_must_be_plain_ids() {
        let mut config = KeelConfig::default();
        config.extensions.autoload = vec![
            "files".to_string(),
            "../escape".to_string(),
            "files".to_string(),
            " ".to_string(),
        ];
        let messages = messages(&config);
        assert_eq!(messages.len(), 3, "{messages:?}");
    }
}
