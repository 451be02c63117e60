// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! keel - a plugin host for components and extension processes.
//!
//! This is the binary entry point for the keel host.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod inspect;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// keel - a plugin host for components and extension processes.
#[derive(Parser, Debug)]
#[command(name = "keel", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard lookup chain.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the host until SIGINT or SIGTERM.
    Serve,
    /// List the registered launcher target triples.
    Launchers,
    /// Validate and summarise the extension in a directory.
    Inspect {
        /// Directory containing `extension.json`.
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => keel_config::load_and_validate_path(path),
        None => keel_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            keel_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Launchers) => inspect::run_launchers(config),
        Some(Commands::Inspect { dir }) => inspect::run_inspect(&dir),
        None => {
            println!("keel: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("keel: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["keel", "inspect", "ext", "--config", "k.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("k.toml")));
        assert!(matches!(cli.command, Some(Commands::Inspect { dir }) if dir == PathBuf::from("ext")));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = keel_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.host.name, "keel");
    }
}
