// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `keel serve` command implementation.
//!
//! Builds the host, activates the `core` component and every autoloaded
//! extension, then waits for a shutdown signal and tears everything down in
//! reverse activation order.

use keel_config::KeelConfig;
use keel_core::KeelError;
use keel_runtime::Host;
use tracing::{error, info, warn};

use crate::shutdown;

/// Runs the `keel serve` command.
pub async fn run_serve(config: KeelConfig) -> Result<(), KeelError> {
    init_tracing(&config.host.log_level);
    info!(
        name = %config.host.name,
        extensions = %config.extensions.directory.display(),
        "starting keel serve"
    );

    let host = Host::new(config)?;
    let cancel = shutdown::install_signal_handler();

    let failures = host.startup().await;
    if failures.is_empty() {
        info!(
            components = host.registry().component_list().len(),
            "all components started"
        );
    } else {
        for (name, e) in &failures {
            warn!(component = %name, error = %e, "component did not start");
        }
    }

    cancel.cancelled().await;

    if let Err(e) = host.shutdown().await {
        error!(error = %e, "shutdown finished with errors");
        return Err(e);
    }
    info!("keel serve shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise keel crates log at `log_level` and everything
/// else at `warn`.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("keel={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
