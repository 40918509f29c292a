// CLI entry point for the Soundstage relay.
//
// Starts a standalone relay that storytelling devices connect to. See
// `server.rs` for the threading model and `hub.rs` for fan-out rules.
//
// Usage:
//   relay [OPTIONS]
//     --config <PATH>         TOML config file
//     --bind <ADDR>           Interface to bind (default: 127.0.0.1)
//     --port <PORT>           Listen port (default: 7878)
//     --default-mode <ID>     Story mode held before anyone changes it
//
// The process runs until killed.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use soundstage_relay::config::RelayConfig;
use soundstage_relay::server::start_relay;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Soundstage event relay")]
struct Args {
    /// TOML config file (defaults to ./soundstage-relay.toml when present).
    #[arg(long, env = "SOUNDSTAGE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Story mode the hub starts with.
    #[arg(long)]
    default_mode: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref()).context("loading relay config")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mode) = args.default_mode {
        config.default_story_mode = Some(mode);
    }

    init_tracing(&config.log_level);

    let (handle, addr) = start_relay(config).context("starting relay")?;
    info!(%addr, "relay ready; press Ctrl+C to stop");
    handle.wait();
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
