//! # cuesync
//!
//! Run a cuesync parent or child from the terminal.
//!
//! ## Commands
//!
//! - `init`: Write a default parent configuration
//! - `host`: Run the parent timer, driven by commands on stdin
//! - `pair`: Show the address children should dial
//! - `follow`: Dial a parent and show its timer
//!
//! ## Example
//!
//! ```bash
//! # On the parent
//! cuesync init
//! cuesync host
//! > start 300
//!
//! # On each child
//! cuesync follow 192.168.1.20:7420
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{follow, host, init, pair};

/// Synchronized show timer for a parent and its children.
#[derive(Parser, Debug)]
#[command(name = "cuesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the parent configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default parent configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run the parent timer
    Host {
        /// Configuration file (default: host.toml in the data directory)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(long, short)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show the address children should dial
    Pair {
        /// Configuration file (default: host.toml in the data directory)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Follow a parent at host:port
    Follow {
        /// Parent address, as printed by `cuesync pair`
        address: String,

        /// Seconds to keep dialing before giving up
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Redraw at the low-power rate (battery-powered displays)
        #[arg(long)]
        low_power: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cuesync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };

    match cli.command {
        Commands::Init { force } => {
            init::run(&data_dir, force).await?;
        }
        Commands::Host {
            config: config_path,
            port,
            bind,
        } => {
            let mut config = config::load_host_config(&data_dir, config_path.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            host::run(config).await?;
        }
        Commands::Pair {
            config: config_path,
            port,
        } => {
            let config = config::load_host_config(&data_dir, config_path.as_deref())?;
            pair::run(port.unwrap_or(config.server.port));
        }
        Commands::Follow {
            address,
            timeout,
            low_power,
        } => {
            follow::run(&address, Duration::from_secs(timeout), low_power).await?;
        }
    }

    Ok(())
}
