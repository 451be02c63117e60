// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order, later overriding earlier: compiled defaults,
//! `/etc/keel/keel.toml`, `<config dir>/keel/keel.toml`, `./keel.toml`, then
//! `KEEL_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::KeelConfig;

/// Sections a `KEEL_<SECTION>_<KEY>` variable can address.
const SECTIONS: &[&str] = &["host", "extensions", "protocol", "launchers"];

pub(crate) const SYSTEM_CONFIG: &str = "/etc/keel/keel.toml";
pub(crate) const LOCAL_CONFIG: &str = "keel.toml";

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keel").join("keel.toml"))
}

/// Builds the full layered figment without extracting it.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(KeelConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment.merge(Toml::file(LOCAL_CONFIG)).merge(env_provider())
}

/// Loads configuration from the standard lookup chain.
pub fn load_config() -> Result<KeelConfig, figment::Error> {
    build_figment().extract()
}

/// Loads configuration from one explicit file plus environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<KeelConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KeelConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Loads configuration from TOML text only. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<KeelConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KeelConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Maps `KEEL_PROTOCOL_REQUEST_TIMEOUT_MS` to `protocol.request_timeout_ms`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// keys that contain underscores survive intact.
fn env_provider() -> Env {
    Env::prefixed("KEEL_").map(|key| {
        let key = key.as_str().to_ascii_lowercase();
        SECTIONS
            .iter()
            .find_map(|section| {
                key.strip_prefix(*section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|field| format!("{section}.{field}"))
            })
            .unwrap_or(key)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_keep_inner_underscores() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KEEL_PROTOCOL_REQUEST_TIMEOUT_MS", "2500");
            jail.set_env("KEEL_LAUNCHERS_INLINE_BUFFER_SIZE", "1024");
            let config: KeelConfig = Figment::new()
                .merge(Serialized::defaults(KeelConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.protocol.request_timeout_ms, 2500);
            assert_eq!(config.launchers.inline_buffer_size, 1024);
            Ok(())
        });
    }

    #[test]
    fn local_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(LOCAL_CONFIG, "[host]\nlog_level = \"debug\"\n")?;
            let config: KeelConfig = Figment::new()
                .merge(Serialized::defaults(KeelConfig::default()))
                .merge(Toml::file(LOCAL_CONFIG))
                .extract()?;
            assert_eq!(config.host.log_level, "debug");
            assert_eq!(config.host.name, "keel");
            Ok(())
        });
    }
}
