//! dmxbusd - lighting bus host daemon

use anyhow::Result;
use clap::Parser;
use dmxbus::{Daemon, DaemonConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dmxbusd")]
#[command(version, about = "Host daemon for dmxbus lighting universes", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DMXBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Print the registry structure as JSON and exit
    #[arg(long)]
    dump_structure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.log.level = level;
        config.validate()?;
    }

    let _log_guard = dmxbus::logging::init(&config.log)?;
    match &args.config {
        Some(path) => info!("Configuration loaded from {:?}", path),
        None => info!("No configuration file, using defaults"),
    }

    let daemon = Daemon::build(&config)?;

    if args.dump_structure {
        println!("{}", daemon.structure_json()?);
        daemon.teardown();
        return Ok(());
    }

    daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
}
